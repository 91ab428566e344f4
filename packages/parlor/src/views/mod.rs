mod index;

pub use index::index_page;

/// Channels offered in the sidebar. Any other name still works over the API.
pub const CHANNELS: &[&str] = &["general", "random"];

pub const CSS: &str = r#"
    .channel { cursor: pointer; }
    .channel--active { background-color: #374151; color: #f9fafb; }
    .message { padding: 0.25rem 0; word-break: break-word; }
"#;
