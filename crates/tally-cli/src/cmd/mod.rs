pub mod inspect;
pub mod script;
pub mod sim;
