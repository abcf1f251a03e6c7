pub mod chat;
pub mod knowledge;
pub mod resume;
pub mod run;
pub mod session;
pub mod threads;
pub mod version;
