//! 进行中的对话回合

use mammo_core::ChatMessage;

/// 追问服务不可用时写入的固定回复
pub const CHAT_FALLBACK: &str = "Diagnostic chat service currently unavailable.";

/// 流式回复的累积缓冲
///
/// 片段只在这里拼接；流结束时转为一条不可变的模型消息，
/// 出错时转为固定的兜底消息。病例的对话记录里不会出现半截回复。
#[derive(Debug, Default)]
pub struct InProgressTurn {
    text: String,
    fragments: usize,
}

impl InProgressTurn {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加片段，返回目前为止的完整文本
    pub fn push(&mut self, fragment: &str) -> &str {
        self.text.push_str(fragment);
        self.fragments += 1;
        &self.text
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn fragment_count(&self) -> usize {
        self.fragments
    }

    /// 正常结束，空回复按服务不可用处理
    pub fn finalize(self) -> ChatMessage {
        if self.text.trim().is_empty() {
            return Self::fallback();
        }
        ChatMessage::model(self.text)
    }

    /// 流出错，丢弃已收到的片段
    pub fn fail(self) -> ChatMessage {
        Self::fallback()
    }

    fn fallback() -> ChatMessage {
        ChatMessage::model(CHAT_FALLBACK)
    }
}
