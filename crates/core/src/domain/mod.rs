pub mod booking;
pub mod call;
pub mod facts;
pub mod summary;
pub mod turn;
