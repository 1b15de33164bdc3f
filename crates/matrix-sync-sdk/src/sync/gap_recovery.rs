/// 时间线间隙补齐
///
/// 服务器截断了已知房间的时间线时，从 `prev_batch` 开始反向分页，
/// 直到遇到该房间最后一条已知事件，把中间缺失的事件按正序返回。
/// 分页耗尽仍未找到时只记录警告，调用方继续使用本批次的事件。

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::Result;
use crate::identifier::Identifier;
use crate::transport::MatrixTransport;
use crate::types::RoomEvent;

/// 默认每页事件数
pub const DEFAULT_BACKFILL_PAGE_SIZE: usize = 50;

/// 补齐结果
#[derive(Debug, Clone)]
pub enum RecoveryOutcome {
    /// 找到最后一条已知事件；`events` 为缺失部分，按时间正序
    Recovered { events: Vec<Arc<RoomEvent>>, pages: usize },
    /// 分页耗尽仍未找到，接受分歧
    Exhausted { pages: usize, scanned: usize },
}

impl RecoveryOutcome {
    /// 需要插到本批次时间线之前的事件
    pub fn into_events(self) -> Vec<Arc<RoomEvent>> {
        match self {
            RecoveryOutcome::Recovered { events, .. } => events,
            RecoveryOutcome::Exhausted { .. } => Vec::new(),
        }
    }

    pub fn pages(&self) -> usize {
        match self {
            RecoveryOutcome::Recovered { pages, .. } | RecoveryOutcome::Exhausted { pages, .. } => *pages,
        }
    }
}

/// 反向分页补齐器
pub struct GapRecovery {
    transport: Arc<dyn MatrixTransport>,
    page_size: usize,
}

impl GapRecovery {
    pub fn new(transport: Arc<dyn MatrixTransport>, page_size: usize) -> Self {
        Self {
            transport,
            page_size: page_size.max(1),
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// 从 `from_token` 反向分页直到遇到 `last_known_event_id`
    ///
    /// 传输错误直接返回，由调用方决定降级。
    pub async fn recover(
        &self,
        room_id: &Identifier,
        from_token: &str,
        last_known_event_id: &str,
    ) -> Result<RecoveryOutcome> {
        info!(
            "开始补齐时间线间隙: room_id={}, from={}, last_known={}",
            room_id, from_token, last_known_event_id
        );

        // 按从新到旧累积
        let mut newest_first: Vec<Arc<RoomEvent>> = Vec::new();
        let mut token = from_token.to_string();
        let mut pages = 0usize;

        loop {
            let page = self
                .transport
                .get_events(room_id, &token, true, self.page_size)
                .await?;
            pages += 1;
            debug!(
                "补齐分页: room_id={}, page={}, chunk={}",
                room_id,
                pages,
                page.chunk.len()
            );

            if page.chunk.is_empty() {
                break;
            }

            for event in page.chunk {
                if event.event_id == last_known_event_id {
                    newest_first.reverse();
                    info!(
                        "时间线间隙补齐完成: room_id={}, recovered={}, pages={}",
                        room_id,
                        newest_first.len(),
                        pages
                    );
                    return Ok(RecoveryOutcome::Recovered {
                        events: newest_first,
                        pages,
                    });
                }
                newest_first.push(event);
            }

            match page.end {
                Some(next) => token = next,
                None => break,
            }
        }

        warn!(
            "时间线补齐未找到最后已知事件，接受分歧: room_id={}, last_known={}, scanned={}, pages={}",
            room_id,
            last_known_event_id,
            newest_first.len(),
            pages
        );
        Ok(RecoveryOutcome::Exhausted {
            pages,
            scanned: newest_first.len(),
        })
    }
}
