use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::Config;
use crate::connectivity::ConnectivityMonitor;
use crate::event::{Event, EventHandler};
use crate::net::{Gateway, GatewayError, HttpTransport, SendError, Session, Transport};
use crate::queue::{OfflineQueue, RetryPolicy};
use crate::store::{self, CacheLayer, LocalStore, QueuedRequest};
use crate::sync::{Resource, SyncService, SyncStatus};
use crate::view::{ResourceView, ViewState};

/// Wires the engine together and implements each command.
pub struct App {
  config: Config,
  store: Arc<dyn LocalStore>,
  transport: Arc<dyn Transport>,
  monitor: ConnectivityMonitor,
  queue: Arc<OfflineQueue>,
  gateway: Arc<Gateway>,
  sync: SyncService,
  layer: CacheLayer,
}

impl App {
  pub async fn new(config: Config) -> Result<Self> {
    let db_path = match &config.storage.path {
      Some(path) => path.clone(),
      None => Config::data_dir()?.join("roadbook.db"),
    };
    let store = store::init(&db_path);

    let timeout = config.request_timeout();
    let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new(&config.api.url, timeout)?);
    let session = Session::new(Config::get_api_token());
    let resources = if config.sync.resources.is_empty() {
      Resource::defaults()
    } else {
      Resource::parse_all(&config.sync.resources).map_err(|e| eyre!(e))?
    };

    let monitor =
      ConnectivityMonitor::detect(transport.as_ref(), &config.api.health_endpoint, timeout).await;

    let policy = RetryPolicy {
      max_attempts: config.sync.max_attempts.max(1),
      request_timeout: timeout,
    };
    let queue = Arc::new(OfflineQueue::new(
      store.clone(),
      transport.clone(),
      session.clone(),
      policy,
    ));
    let gateway = Arc::new(Gateway::new(
      transport.clone(),
      monitor.clone(),
      queue.clone(),
      session.clone(),
      timeout,
    ));
    let sync = SyncService::new(
      queue.clone(),
      store.clone(),
      transport.clone(),
      session,
      monitor.clone(),
      resources,
      timeout,
    );
    // A snapshot older than one sync interval missed at least one pass
    let stale_time = chrono::Duration::from_std(config.sync_interval())
      .map_err(|e| eyre!("Invalid sync interval: {}", e))?;
    let layer = CacheLayer::new(store.clone()).with_stale_time(stale_time);

    Ok(Self {
      config,
      store,
      transport,
      monitor,
      queue,
      gateway,
      sync,
      layer,
    })
  }

  /// Issue one call through the gateway.
  pub async fn send(&self, method: &str, endpoint: &str, body: Option<&str>) -> Result<()> {
    let body = body
      .map(serde_json::from_str::<Value>)
      .transpose()
      .map_err(|e| eyre!("Invalid JSON body: {}", e))?;

    match self.gateway.request(method, endpoint, body).await {
      Ok(response) => {
        println!("{}", serde_json::to_string_pretty(&response.data)?);
        if let Some(seq) = response.queued_id {
          eprintln!(
            "warning: service unreachable, request queued as #{} and will be sent once back online",
            seq
          );
        }
        Ok(())
      }
      Err(GatewayError::Rejected(SendError::Application {
        status,
        message,
        body,
      })) => {
        debug!(%body, "rejection body");
        Err(eyre!(
          "{} {} rejected by the service ({}): {}",
          method.to_uppercase(),
          endpoint,
          status,
          message
        ))
      }
      Err(e) => Err(eyre!(e)),
    }
  }

  pub fn status(&self) -> Result<()> {
    println!("{}", self.sync.status().summary());
    if !self.store.is_durable() {
      println!("storage: in memory, queued requests will not survive a restart");
    }
    Ok(())
  }

  /// Run one pass and report it.
  pub async fn sync(&self) -> Result<()> {
    self.queue.recover()?;

    let result = self.sync.sync_now().await;
    println!("{}", self.sync.status().summary());
    result.map_err(|e| eyre!("Sync failed: {}", e))
  }

  pub fn queue(&self, dead: bool) -> Result<()> {
    if dead {
      let letters = self.queue.dead_letters()?;
      if letters.is_empty() {
        println!("no dead letters");
      }
      for letter in letters {
        println!(
          "{}  died {}  {}",
          format_request(&letter.entry),
          letter.died_at.format("%Y-%m-%d %H:%M:%S"),
          letter.reason
        );
      }
    } else {
      let pending = self.queue.pending()?;
      if pending.is_empty() {
        println!("queue is empty");
      }
      for entry in pending {
        let error = entry.last_error.as_deref().unwrap_or("");
        println!("{}  {}", format_request(&entry), error);
      }
    }
    Ok(())
  }

  /// Read a resource, live when possible and from the cache otherwise.
  pub async fn show(&self, name: &str, offline: bool) -> Result<()> {
    let resource: Resource = name.parse().map_err(|e: String| eyre!(e))?;
    let mut view = self.view(resource);

    if offline {
      view.load_cached();
    } else {
      view.fetch();
      let mut ticker = tokio::time::interval(Duration::from_millis(50));
      while view.state().is_loading() {
        ticker.tick().await;
        view.poll();
      }
    }

    match view.state() {
      ViewState::Ready(result) => {
        let when = result
          .cached_at
          .map(|t| format!(" from {}", t.format("%Y-%m-%d %H:%M:%S UTC")))
          .unwrap_or_default();
        eprintln!("{} ({}{})", view.resource(), result.source.label(), when);
        println!("{}", serde_json::to_string_pretty(&result.data)?);
        Ok(())
      }
      ViewState::Error(e) => Err(eyre!("{}", e)),
      ViewState::Idle | ViewState::Loading => Err(eyre!("{} did not load", view.resource())),
    }
  }

  /// Long-running mode: keep syncing until Ctrl-C.
  pub async fn run(&self) -> Result<()> {
    let probe = self.monitor.spawn_probe(
      self.transport.clone(),
      self.config.api.health_endpoint.clone(),
      self.config.request_timeout(),
      self.config.probe_interval(),
    );

    self.sync.start(self.config.sync_interval()).await;

    let mut dashboard = self.view(Resource::DashboardStats).watch(self.sync.subscribe());
    dashboard.load_cached();
    print_dashboard(dashboard.state());

    let mut events = EventHandler::new(
      self.config.status_poll_interval(),
      self.monitor.subscribe(),
      self.sync.subscribe(),
    );
    let mut last_status: Option<SyncStatus> = None;

    while let Some(event) = events.next().await {
      match event {
        Event::Tick => {
          let status = self.sync.status();
          if last_status.as_ref() != Some(&status) {
            println!("{}", status.summary());
            last_status = Some(status);
          }
          if dashboard.poll() {
            print_dashboard(dashboard.state());
          }
        }
        Event::Connectivity(online) => {
          println!("{}", if online { "back online" } else { "connection lost" });
        }
        Event::Refreshed(event) => {
          debug!(keys = ?event.keys, "cache entries refreshed");
          if dashboard.poll() {
            print_dashboard(dashboard.state());
          }
        }
        Event::Shutdown => break,
      }
    }

    info!(passes = self.sync.passes(), "shutting down");
    drop(events);
    probe.abort();
    self.sync.shutdown().await;
    Ok(())
  }

  fn view(&self, resource: Resource) -> ResourceView {
    let gateway = self.gateway.clone();
    ResourceView::new(resource, self.layer.clone(), move |endpoint| {
      let gateway = gateway.clone();
      async move { gateway.get(&endpoint).await }
    })
  }
}

fn format_request(entry: &QueuedRequest) -> String {
  format!(
    "#{:<5} {:<7} {:<30} {:<16} attempts: {}  queued {}",
    entry.seq,
    entry.request.method,
    entry.request.endpoint,
    entry.status.as_str(),
    entry.attempts,
    entry.created_at.format("%Y-%m-%d %H:%M:%S")
  )
}

fn print_dashboard(state: &ViewState) {
  match state {
    ViewState::Ready(result) => {
      let body = serde_json::to_string(&result.data).unwrap_or_default();
      println!("dashboard ({}): {}", result.source.label(), body);
    }
    ViewState::Error(e) => println!("dashboard: {}", e),
    ViewState::Idle | ViewState::Loading => {}
  }
}
