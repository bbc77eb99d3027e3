pub mod container;
pub mod dataset;
pub mod driver;
pub mod handle_table;
pub mod handlers;
pub mod session;
pub mod session_state;
pub mod transfer;
pub mod types;
pub mod utils;


pub use driver::ClassDriver;
pub use session::MtpResponder;
pub use session_state::*;
