pub mod schema;

pub use schema::{default_aliases, default_lookups, Config, LinksConfig, PluginsConfig, ResolverConfig};
