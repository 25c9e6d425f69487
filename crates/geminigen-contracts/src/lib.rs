pub mod events;
pub mod panel;
pub mod presets;
pub mod receipts;
pub mod resolution;
pub mod settings;
