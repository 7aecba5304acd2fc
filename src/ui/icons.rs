pub struct Icons;

impl Icons {
    pub const ROCKET: &str = "🚀";
    pub const CHECK: &str = "✅";
    pub const CROSS: &str = "❌";
    pub const WARN: &str = "⚠️";
    pub const INFO: &str = "ℹ️";
    pub const STATS: &str = "📊";
    pub const COIN: &str = "🪙";
    pub const HINT: &str = "🏷️";
    pub const DATABASE: &str = "🗄️";
    pub const REWIND: &str = "⏪";
    pub const WRENCH: &str = "🔧";
    pub const GEAR: &str = "⚙️";
}
