pub mod event_board;

pub use event_board::EventBoard;
