//! Service wiring: transport, publisher, projection worker and stores.
//!
//! With no `REDIS_URL`/`DATABASE_URL` everything runs in-process: the owning
//! side publishes onto an in-memory bus that the projection worker of the
//! dependent side consumes.

use std::sync::{Arc, Mutex};

use anyhow::Context;
use tracing::{info, warn};

use postview_core::{InMemoryIdSequence, InMemoryStore, UserId};
use postview_events::{EventBus, InMemoryEventBus, TransportRecord, USER_EVENTS_TOPIC};
use postview_infra::{
    InMemoryUserViewStore, PostService, ProjectionWorker, UserViewProjection, UserViewStore, WorkerHandle,
};
use postview_posts::InMemoryPostStore;
use postview_users::{EventPublisher, User, UserService};

use crate::config::AppConfig;

/// View store behind the enrichment join, in-memory or Postgres.
pub type ViewStore = Arc<dyn UserViewStore>;

pub type Users = UserService<Arc<InMemoryStore<UserId, User>>, InMemoryIdSequence>;
pub type Posts = PostService<InMemoryPostStore, ViewStore, InMemoryIdSequence>;

pub struct AppServices {
    pub users: Users,
    pub posts: Posts,
    worker: Mutex<Option<WorkerHandle>>,
}

impl AppServices {
    /// Drain the publisher, then the projection worker. Blocking.
    pub fn shutdown(&self) {
        self.users.publisher().shutdown();
        let worker = self.worker.lock().ok().and_then(|mut w| w.take());
        if let Some(w) = worker {
            w.shutdown();
        }
        info!("services stopped");
    }
}

pub async fn build_services(config: &AppConfig) -> anyhow::Result<AppServices> {
    let view = build_view_store(config).await?;

    #[cfg(feature = "redis")]
    if let Some(url) = &config.redis_url {
        let bus = postview_infra::event_bus::RedisStreamsEventBus::new(url, USER_EVENTS_TOPIC, config.publish_timeout)
            .context("failed to open REDIS_URL")?;
        info!(stream = USER_EVENTS_TOPIC, "using redis streams transport");
        return wire(bus, view, config);
    }

    #[cfg(not(feature = "redis"))]
    if config.redis_url.is_some() {
        warn!("REDIS_URL set but redis feature not enabled, falling back to in-memory bus");
    }

    let bus: Arc<InMemoryEventBus<TransportRecord>> = Arc::new(InMemoryEventBus::new());
    wire(bus, view, config)
}

async fn build_view_store(config: &AppConfig) -> anyhow::Result<ViewStore> {
    #[cfg(feature = "postgres")]
    if let Some(url) = &config.database_url {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await
            .context("failed to connect to DATABASE_URL")?;
        let store = postview_infra::read_model::PostgresUserViewStore::new(pool);
        store
            .ensure_schema()
            .await
            .context("failed to create user_view schema")?;
        info!("user view backed by postgres");
        return Ok(Arc::new(store));
    }

    #[cfg(not(feature = "postgres"))]
    if config.database_url.is_some() {
        warn!("DATABASE_URL set but postgres feature not enabled, falling back to in-memory view");
    }

    Ok(Arc::new(InMemoryUserViewStore::new()))
}

fn wire<B>(bus: B, view: ViewStore, config: &AppConfig) -> anyhow::Result<AppServices>
where
    B: EventBus<TransportRecord> + Clone + 'static,
{
    let projection = Arc::new(UserViewProjection::with_policy(view.clone(), config.apply_policy));
    let worker = ProjectionWorker::spawn(
        "user-view-projection",
        bus.clone(),
        config.partitions,
        move |record: TransportRecord| projection.handle_record(&record).map(|_| ()),
    )
    .context("failed to start projection worker")?;

    let publisher = EventPublisher::spawn(bus, USER_EVENTS_TOPIC, config.publish_timeout)
        .context("failed to start event publisher")?;

    let users = UserService::new(Arc::new(InMemoryStore::new()), InMemoryIdSequence::new(), publisher);
    let posts = PostService::new(InMemoryPostStore::new(), view, InMemoryIdSequence::new());

    info!(
        policy = %config.apply_policy,
        partitions = config.partitions,
        publish_timeout_ms = config.publish_timeout.as_millis() as u64,
        "services wired"
    );

    Ok(AppServices {
        users,
        posts,
        worker: Mutex::new(Some(worker)),
    })
}
