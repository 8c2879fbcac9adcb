//! 系统通知分发服务
//!
//! 以命名的「系统通知」为单位：解析收件人集合、按渠道分发、
//! 大批量发送转入后台任务队列，并可选地记录投递轨迹。
//! 存储、邮件传输与队列运行时均以 trait 形式注入，核心不依赖具体实现。

pub mod job;
pub mod model;
pub mod recipients;
pub mod sender;
pub mod service;
pub mod store;
pub mod template;
pub mod test_utils;
