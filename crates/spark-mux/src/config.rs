use serde::{Deserialize, Serialize};

use crate::error::{MuxError, Result};

const DEFAULT_POOL_CAPACITY: usize = 100;
const DEFAULT_MAX_FRAME_LEN: usize = 16 * 1024 * 1024;
const DEFAULT_READ_BUFFER_CAPACITY: usize = 8 * 1024;

/// 会话级配置。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 将完成句柄池容量、帧长上限与读缓冲步长集中到一个可序列化结构，
///   既能在代码中以 `with_*` 链式构造，也能从 TOML 文件加载；
/// - 帧长上限同时约束读写两个方向，防止畸形长度字段耗尽内存。
///
/// ## 契约（What）
/// - `completion_pool_capacity`：池中最多缓存的空闲完成句柄数，必须 ≥ 1；
///   池耗尽时直接分配新句柄，不会阻塞生产者；
/// - `max_frame_len`：单帧帧体（标识 + 负载）的最大字节数，必须 ≥ 1 且不超过 `u32::MAX`；
/// - `read_buffer_capacity`：读路径每次向传输申请的缓冲增量，必须 ≥ 1；
/// - 缺省字段取默认值，未知字段视为错误。
///
/// ## 注意事项（Trade-offs）
/// - 帧长上限还需不小于标识编码长度，该检查在 [`crate::SessionBuilder::build`] 时结合
///   实际的标识编解码器完成。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    completion_pool_capacity: usize,
    max_frame_len: usize,
    read_buffer_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            completion_pool_capacity: DEFAULT_POOL_CAPACITY,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            read_buffer_capacity: DEFAULT_READ_BUFFER_CAPACITY,
        }
    }
}

impl SessionConfig {
    /// 创建默认配置。
    pub fn new() -> Self {
        Self::default()
    }

    /// 从 TOML 文本解析并校验配置。
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)
            .map_err(|err| MuxError::config(format!("malformed session config: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_completion_pool_capacity(mut self, capacity: usize) -> Self {
        self.completion_pool_capacity = capacity;
        self
    }

    pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len;
        self
    }

    pub fn with_read_buffer_capacity(mut self, capacity: usize) -> Self {
        self.read_buffer_capacity = capacity;
        self
    }

    pub fn completion_pool_capacity(&self) -> usize {
        self.completion_pool_capacity
    }

    pub fn max_frame_len(&self) -> usize {
        self.max_frame_len
    }

    pub fn read_buffer_capacity(&self) -> usize {
        self.read_buffer_capacity
    }

    /// 校验字段取值范围。
    pub fn validate(&self) -> Result<()> {
        if self.completion_pool_capacity == 0 {
            return Err(MuxError::config("completion_pool_capacity must be at least 1"));
        }
        if self.max_frame_len == 0 {
            return Err(MuxError::config("max_frame_len must be at least 1"));
        }
        if u32::try_from(self.max_frame_len).is_err() {
            return Err(MuxError::config(format!(
                "max_frame_len {} does not fit the 32-bit length prefix",
                self.max_frame_len
            )));
        }
        if self.read_buffer_capacity == 0 {
            return Err(MuxError::config("read_buffer_capacity must be at least 1"));
        }
        Ok(())
    }
}
