//! 端到端验证：大批量通知经由队列分流，由 worker 在后台完成投递

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::watch;

use notification_service::model::{NotificationDefinition, RecipientRef};
use notification_service::service::NotificationService;
use notification_service::store::NotificationStore;
use notification_service::template::TemplateEngine;
use notification_service::test_utils::{seeded_directory, RecordingMailer, StaticContext};
use notify_shared::config::NotifyConfig;
use notify_worker::queue::delivery_channel;
use notify_worker::worker::DeliveryWorker;

#[tokio::test]
async fn test_deferred_delivery_end_to_end() {
    let (queue, rx) = delivery_channel();
    let (directory, _) = seeded_directory(10);
    let store = NotificationStore::new();
    let mailer = Arc::new(RecordingMailer::new());

    let service = Arc::new(NotificationService::new(
        NotifyConfig::default(),
        store.clone(),
        directory,
        TemplateEngine::new(),
        mailer.clone(),
        Some(Arc::new(queue)),
    ));

    let mut definition = NotificationDefinition::new("welcome");
    definition.title = "欢迎 {{user.name}}".to_string();
    definition.text_body = "您好 {{user.name}}".to_string();
    for i in 1..=10 {
        definition.add_recipient(RecipientRef::Member(format!("m{i}")));
    }
    store
        .save_definition(definition, &NotifyConfig::default())
        .unwrap();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(DeliveryWorker::new(rx, service.clone()).run(shutdown_rx));

    // 10 个收件人超过阈值，notify 返回时只完成了入队
    let context = StaticContext::new("Order", json!({"order_no": "SO-1001"}));
    service
        .notify("welcome", &context, json!({}), None)
        .await
        .unwrap();

    // 轮询等待 worker 在后台完成全部投递
    for _ in 0..100 {
        if mailer.sent_count() == 10 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(mailer.sent_count(), 10);
    assert!(mailer.sent().iter().any(|m| m.to == "m7@example.com"));

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();
}
