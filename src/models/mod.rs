pub mod alert;
pub mod alert_row;
pub mod countdown;
pub mod message;
