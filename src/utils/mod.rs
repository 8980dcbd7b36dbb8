pub mod chat;
pub mod mailer;
pub mod portal;
pub mod report;
pub mod telegram;
pub mod web_portal;
pub mod whatsapp;
