/// Line prefixes used by the CLI
pub struct Icons;

impl Icons {
    pub const DOCUMENT: &str = "📄";
    pub const STORE: &str = "🗄️";
    pub const TAG: &str = "🏷️";
    pub const TIME: &str = "⏱️";
    pub const COUNT: &str = "📊";
    pub const NOTHING: &str = "🔍";
    pub const DELETED: &str = "🗑️";
    pub const APPLIED: &str = "⬆️";
    pub const REVERTED: &str = "⬇️";
    pub const OK: &str = "✅";
    pub const FAILED: &str = "❌";
    pub const CAUTION: &str = "⚠️";
}
