//! 会话监管：生命周期、中断管理
//!
//! 持有根 CancellationToken 与当前轮的子 token；用户 Ctrl+C 时只取消当前轮，退出时取消根 token。

use std::sync::Mutex;

use tokio_util::sync::CancellationToken;

/// 会话级生命周期管理：根取消令牌 + 当前轮令牌
#[derive(Debug)]
pub struct SessionSupervisor {
    /// 退出时触发，所有轮次随之取消
    root: CancellationToken,
    /// 当前进行中的轮次
    current: Mutex<Option<CancellationToken>>,
}

impl SessionSupervisor {
    pub fn new() -> Self {
        Self {
            root: CancellationToken::new(),
            current: Mutex::new(None),
        }
    }

    /// 为新一轮创建子 token 并登记为当前轮
    pub fn begin_turn(&self) -> CancellationToken {
        let token = self.root.child_token();
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        *current = Some(token.clone());
        token
    }

    /// 当前轮结束，清除登记
    pub fn end_turn(&self) {
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        *current = None;
    }

    /// 取消当前轮（用户 Ctrl+C）；返回是否确有进行中的轮次
    pub fn cancel_current(&self) -> bool {
        let current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        match current.as_ref() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// 取消全部（退出）
    pub fn shutdown(&self) {
        self.root.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.root.is_cancelled()
    }
}

impl Default for SessionSupervisor {
    fn default() -> Self {
        Self::new()
    }
}
