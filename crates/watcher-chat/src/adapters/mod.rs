pub mod discord;
pub mod loopback;

pub use discord::DiscordAdapter;
pub use loopback::LoopbackAdapter;
