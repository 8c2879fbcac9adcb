//! 通知投递 worker 服务
//!
//! 加载配置、组装分发服务与进程内队列，启动消费循环，
//! Ctrl-C 时优雅退出。

use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

use notification_service::sender::LogMailer;
use notification_service::service::NotificationService;
use notification_service::store::NotificationStore;
use notification_service::template::TemplateEngine;
use notify_shared::config::NotifyConfig;
use notify_shared::directory::MemberDirectory;
use notify_worker::queue::delivery_channel;
use notify_worker::worker::DeliveryWorker;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = NotifyConfig::load("notify-worker")?;
    let (queue, rx) = delivery_channel();

    let service = Arc::new(NotificationService::new(
        config,
        NotificationStore::new(),
        MemberDirectory::new(),
        TemplateEngine::new(),
        Arc::new(LogMailer),
        Some(Arc::new(queue)),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(DeliveryWorker::new(rx, service).run(shutdown_rx));

    info!("notify-worker 已启动，Ctrl-C 退出");
    tokio::signal::ctrl_c().await?;

    let _ = shutdown_tx.send(true);
    handle.await?;
    Ok(())
}
