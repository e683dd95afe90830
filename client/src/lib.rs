pub mod catchup;
pub mod channel;
pub mod config;
pub mod constants;
pub mod engine;
pub mod headless;
pub mod invite;
pub mod player;
pub mod protocol;
pub mod sync;
pub mod utils;
pub mod viewer;
pub mod youtube;
