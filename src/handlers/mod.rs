pub mod account_handlers;
pub mod book_handlers;
pub mod health_handlers;
