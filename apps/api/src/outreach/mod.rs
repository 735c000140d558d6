pub mod handlers;
pub mod pipeline;
pub mod prompts;
pub mod record;
pub mod resolver;
pub mod roles;
