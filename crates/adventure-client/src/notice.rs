//! User-visible notices pushed into the output log.

pub const START: &str = "🎲 Starting adventure generation...";
pub const GENERATION_ERROR: &str = "❌ Error generating adventure";
pub const CONNECTION_FAILED: &str = "❌ Connection failed. Please try again.";
pub const PROMPT_REQUIRED: &str = "Please enter details for your adventure";
pub const TIMEOUT: &str = "⏱️ Connection timeout. Please try again.";
