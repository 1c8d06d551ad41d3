use std::sync::{Arc, Weak};
use std::time::Duration;

use anyhow::Context;
use etcd_client::{Client, EventType, WatchOptions, WatchResponse, WatchStream, Watcher};
use log::{error, info, warn};
use tokio::{select, time::sleep};

pub mod utils;

use crate::{
    config::{PlacementArgs, XlineConfig},
    policy::PolicyCache,
    with_xline::utils::{
        PolicyKind, apply_delete, apply_put, connect, get_policy_from_kv, list_policies,
        parse_policy_key,
    },
};

const MIN_BACKOFF: Duration = Duration::from_millis(100);
const MAX_BACKOFF: Duration = Duration::from_secs(5);

/// Start an informer that keeps a [`PolicyCache`] in step with the policy
/// objects stored in xline.
///
/// The returned cache is filled in the background; await
/// [`PolicyCache::wait_for_sync`] before reading it. The informer stops once
/// every strong reference to the cache is gone.
pub async fn start_policy_informer(
    config: &XlineConfig,
) -> Result<Arc<PolicyCache>, anyhow::Error> {
    let cache = Arc::new(PolicyCache::new());
    let weak = Arc::downgrade(&cache);
    let config = config.clone();
    tokio::spawn(async move {
        run_informer(weak, config).await;
    });
    Ok(cache)
}

/// Starts the informer and waits until the cache has been filled. Plugins
/// refuse to start on failure.
pub async fn synced_policy_cache(args: &PlacementArgs) -> Result<Arc<PolicyCache>, anyhow::Error> {
    let cache = start_policy_informer(&args.xline_config).await?;
    cache
        .wait_for_sync(args.sync_timeout())
        .await
        .context("Failed to sync placement policies")?;
    Ok(cache)
}

enum WatchOutcome {
    Applied,
    Reconnect,
    CacheDropped,
}

async fn run_informer(cache: Weak<PolicyCache>, config: XlineConfig) {
    let mut backoff = MIN_BACKOFF;
    loop {
        match list_and_watch(&cache, &config).await {
            Ok(WatchOutcome::CacheDropped) => {
                info!("policy cache dropped, stopping informer");
                return;
            }
            Ok(_) => backoff = MIN_BACKOFF,
            Err(e) => {
                error!("policy informer: {e:#}");
                match cache.upgrade() {
                    Some(c) => c.mark_failed(&format!("{e:#}")),
                    None => return,
                }
            }
        }
        sleep(backoff).await;
        backoff = std::cmp::min(backoff * 2, MAX_BACKOFF);
    }
}

/// Lists every policy object, then applies watch events until a stream fails.
async fn list_and_watch(
    cache: &Weak<PolicyCache>,
    config: &XlineConfig,
) -> Result<WatchOutcome, anyhow::Error> {
    let mut client = connect(config).await?;
    let list = list_policies(&mut client, &config.prefix).await?;
    let revision = list.revision;
    {
        let Some(cache) = cache.upgrade() else {
            return Ok(WatchOutcome::CacheDropped);
        };
        info!(
            "policy informer listed {} distribution, {} cluster distribution, {} workload policies at rev {revision}",
            list.distribution.len(),
            list.cluster_distribution.len(),
            list.workload.len()
        );
        cache.replace_all(list.distribution, list.cluster_distribution, list.workload);
        cache.mark_synced();
    }

    let (_dp_watcher, mut dp_stream) =
        watch_kind(&mut client, &config.prefix, PolicyKind::Distribution, revision).await?;
    let (_cdp_watcher, mut cdp_stream) =
        watch_kind(&mut client, &config.prefix, PolicyKind::ClusterDistribution, revision).await?;
    let (_wp_watcher, mut wp_stream) =
        watch_kind(&mut client, &config.prefix, PolicyKind::Workload, revision).await?;

    loop {
        let outcome = select! {
            msg = dp_stream.message() => handle_policy_update(cache, &config.prefix, msg),
            msg = cdp_stream.message() => handle_policy_update(cache, &config.prefix, msg),
            msg = wp_stream.message() => handle_policy_update(cache, &config.prefix, msg),
            _ = sleep(MAX_BACKOFF) => {
                if cache.strong_count() == 0 {
                    WatchOutcome::CacheDropped
                } else {
                    WatchOutcome::Applied
                }
            }
        };
        match outcome {
            WatchOutcome::Applied => {}
            other => return Ok(other),
        }
    }
}

async fn watch_kind(
    client: &mut Client,
    prefix: &str,
    kind: PolicyKind,
    revision: i64,
) -> Result<(Watcher, WatchStream), anyhow::Error> {
    let opts = WatchOptions::new()
        .with_prefix()
        .with_start_revision(revision + 1);
    let (watcher, stream) = client.watch(kind.key_prefix(prefix), Some(opts)).await?;
    Ok((watcher, stream))
}

fn handle_policy_update(
    cache: &Weak<PolicyCache>,
    prefix: &str,
    msg: Result<Option<WatchResponse>, etcd_client::Error>,
) -> WatchOutcome {
    let resp = match msg {
        Ok(Some(resp)) => resp,
        Ok(None) => {
            warn!("policy watch stream closed, reconnecting...");
            return WatchOutcome::Reconnect;
        }
        Err(e) => {
            error!("policy watch stream error: {e}");
            return WatchOutcome::Reconnect;
        }
    };
    if resp.canceled() {
        warn!("policy watch canceled, reconnecting...");
        return WatchOutcome::Reconnect;
    }

    let Some(cache) = cache.upgrade() else {
        return WatchOutcome::CacheDropped;
    };
    for e in resp.events() {
        let Some(kv) = e.kv() else {
            continue;
        };
        match e.event_type() {
            EventType::Put => match get_policy_from_kv(prefix, kv) {
                Ok(object) => apply_put(&cache, object),
                Err(err) => warn!("ignoring policy update: {err}"),
            },
            EventType::Delete => {
                let key = String::from_utf8_lossy(kv.key());
                if let Some(key) = parse_policy_key(prefix, &key) {
                    apply_delete(&cache, &key);
                }
            }
        }
    }
    WatchOutcome::Applied
}
