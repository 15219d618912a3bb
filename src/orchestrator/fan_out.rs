//! 逐题并发处理 - 编排层
//!
//! 每道题一个 `tokio::spawn` 任务，全部同时启动后统一等待。
//! 可选的信号量在任务内部获取，限制同时运行的题目数量。
//! 任务 panic 在边界处转换为 `Failed`，每道题恰好产出一个 `ItemResult`。

use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{error, info};

use crate::models::item::ItemWithLocations;
use crate::models::result::ItemResult;
use crate::workflow::{ItemCtx, ItemFlow};

/// 并发处理所有题目，结果按题目序号排序
///
/// `max_concurrent` 为 0 时不限制。
pub async fn fan_out(
    flow: Arc<ItemFlow>,
    items: Vec<ItemWithLocations>,
    exam_id: &str,
    max_concurrent: usize,
) -> Vec<ItemResult> {
    let total = items.len();
    let semaphore = (max_concurrent > 0).then(|| Arc::new(Semaphore::new(max_concurrent)));

    info!(
        "[试卷 {}] 🚀 同时启动 {} 道题 (并发上限: {})",
        exam_id,
        total,
        if max_concurrent > 0 {
            max_concurrent.to_string()
        } else {
            "不限".to_string()
        }
    );

    let mut handles = Vec::with_capacity(total);
    for located in items {
        let ctx = ItemCtx::new(exam_id, located.item.index, total, &located.item.label);
        let item = located.item.clone();
        let flow = Arc::clone(&flow);
        let semaphore = semaphore.clone();

        let handle = tokio::spawn(async move {
            let _permit = match semaphore {
                Some(s) => s.acquire_owned().await.ok(),
                None => None,
            };
            flow.run(&located, &ctx).await
        });
        handles.push((item, handle));
    }

    let mut results = Vec::with_capacity(total);
    for (item, handle) in handles {
        match handle.await {
            Ok(result) => results.push(result),
            Err(e) => {
                error!("[试卷 {}] 题目 {} 任务异常终止: {}", exam_id, item.label, e);
                results.push(ItemResult::failed(item, format!("任务异常终止: {}", e)));
            }
        }
    }

    results.sort_by_key(|r| r.item.index);
    results
}
