//! 游戏逻辑模块
//!
//! 会话状态机和会话控制器

mod session;
mod state;

pub use session::*;
pub use state::*;
