//! Ticket model: identity, conversation, classification, outcomes and the
//! status lifecycle.

pub mod types;

pub use types::{
    AccountSnapshot, ArticleScore, Category, Channel, Message, Role, Route, Ticket, TicketStatus,
    Urgency,
};
