//! # wayfarer
//!
//! A polite, parallel web-crawling engine.
//!
//! Seed URLs go in through [`Spider::visit`]; ingestor workers fetch them
//! under per-host rate limits and robots.txt rules, hand responses to your
//! callbacks, and follow the links you choose with the priorities you give
//! them, until the crawl is stopped or drained. The request queue and the
//! visited cache are pluggable: the built-in implementations live in
//! memory, and Redis-backed ones (feature `redis`) let several processes
//! share one frontier.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use wayfarer::Spider;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), wayfarer::Error> {
//!     let spider = Spider::builder()
//!         .allowed_domains(["example\\.com"])
//!         .ingestors(4)
//!         .max_depth(10)
//!         .throttle(Duration::from_millis(500))
//!         .user_agent("mybot/1.0")
//!         .build()?;
//!
//!     let follower = spider.clone();
//!     spider.on_html("a[href]", move |res, el| {
//!         let spider = follower.clone();
//!         async move {
//!             if let Some(href) = el.attr("href") {
//!                 let _ = spider.follow(href, &res, 10).await;
//!             }
//!         }
//!     })?;
//!
//!     spider.on_response(|res| async move {
//!         println!("{} {}", res.status(), res.request().url());
//!     });
//!
//!     spider.visit("http://example.com/").await?;
//!     spider.start().await;
//!     spider.wait().await;
//!     Ok(())
//! }
//! ```

pub mod builder;
pub mod cache;
pub mod client;
pub mod error;
pub mod limits;
pub mod queue;
#[cfg(feature = "redis")]
pub mod redis;
pub mod request;
pub mod response;
pub mod spider;
pub mod stats;
pub mod util;

pub use builder::SpiderBuilder;
pub use cache::{MemoryCache, VisitedCache};
pub use client::{HttpClient, ReqwestClient};
pub use error::Error;
pub use limits::robots::{match_url_rule, RobotFile, RobotRules};
pub use limits::throttle::{Throttle, ThrottleCollection};
pub use limits::{AllowedDomainsFilter, FnFilter, MaxDepthFilter, RequestFilter};
pub use queue::{HeapQueue, RequestQueue};
pub use request::Request;
pub use response::{Element, Response};
pub use spider::{RobotPolicy, Spider, SpiderState, UserAgent};
pub use stats::StatCollector;

#[cfg(feature = "redis")]
pub use crate::redis::{RedisCache, RedisQueue};
