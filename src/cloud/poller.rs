use crate::cloud::client::FirestoreClient;
use crate::cloud::model::{
    PrintJob, Target, TypedValue, MAX_PAYLOAD_BYTES, STATUS_FAILED, STATUS_PRINTED, STATUS_QUEUED,
};
use crate::errors::DaemonError;
use crate::runtime_config::RuntimeConfig;
use crate::transport::{os_spooler, tcp};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

const POLL_INTERVAL: Duration = Duration::from_secs(1);
const DRAIN_DELAY: Duration = Duration::from_millis(500);
const LIST_LIMIT: u32 = 20;

/// Polls a Firestore-shaped remote document store for queued print jobs at a
/// fixed interval, claims and dispatches them one at a time, and reports the
/// outcome back to the store. `start`/`stop` are idempotent.
pub struct CloudPoller {
    handle: tokio::task::JoinHandle<()>,
    stop_signal: Arc<AtomicBool>,
}

impl CloudPoller {
    /// Start polling with the given runtime config snapshot.
    pub fn start(config: RuntimeConfig) -> Self {
        let stop_signal = Arc::new(AtomicBool::new(false));
        let processing = Arc::new(AtomicBool::new(false));
        let drain_trigger = Arc::new(Notify::new());

        let client = Arc::new(FirestoreClient::new(config.cloud_project_id.clone()));
        let collection_path = format!("restaurants/{}/printQueue", config.restaurant_id);

        let task_stop = stop_signal.clone();
        let task_processing = processing.clone();
        let task_drain = drain_trigger.clone();
        let device_id = config.device_id.clone();
        let device_name = config.device_name.clone();

        let handle = tokio::spawn(async move {
            info!(restaurant_id = %config.restaurant_id, "cloud poller started");

            // Fire one immediate poll, then proceed on the fixed interval.
            let mut interval = tokio::time::interval(POLL_INTERVAL);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    _ = task_drain.notified() => {}
                }

                if task_stop.load(Ordering::Relaxed) {
                    break;
                }

                if task_processing.swap(true, Ordering::AcqRel) {
                    // Another poll is already dispatching a job; skip this tick.
                    continue;
                }

                let drained_any = run_poll_cycle(
                    &client,
                    &collection_path,
                    &device_id,
                    &device_name,
                )
                .await;

                task_processing.store(false, Ordering::Release);

                if drained_any {
                    let drain_task = task_drain.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(DRAIN_DELAY).await;
                        drain_task.notify_one();
                    });
                }
            }

            info!("cloud poller stopped");
        });

        Self { handle, stop_signal }
    }

    /// Cancel future ticks. An in-flight poll is allowed to run to
    /// completion; this does not await it.
    pub async fn stop(self) {
        self.stop_signal.store(true, Ordering::Relaxed);
        self.handle.abort();
    }
}

/// Run one poll cycle: list queued jobs, claim and dispatch at most one of
/// them (mutual exclusion is enforced by the caller's `processing` flag, not
/// here — this just dispatches the first claimable job in the batch).
/// Returns `true` if a job was found in this batch (used to schedule the
/// drain retrigger).
async fn run_poll_cycle(
    client: &FirestoreClient,
    collection_path: &str,
    device_id: &str,
    device_name: &str,
) -> bool {
    let documents = match client.list_queued(collection_path, LIST_LIMIT).await {
        Ok(docs) => docs,
        Err(e) => {
            warn!("poll failed, will retry next tick: {}", e);
            return false;
        }
    };

    if documents.is_empty() {
        return false;
    }

    for doc in &documents {
        let job_id = doc.name.rsplit('/').next().unwrap_or(&doc.name).to_string();
        let Some(job) = PrintJob::from_fields(job_id.clone(), &doc.fields) else {
            continue;
        };

        if job.status != STATUS_QUEUED {
            continue;
        }

        match claim_job(client, collection_path, &job, device_id, device_name).await {
            Ok(true) => {
                dispatch_and_report(client, collection_path, job).await;
                // One job per processing window, per the mutual-exclusion contract.
                return true;
            }
            Ok(false) => {
                debug!(job = %job_id, "job already claimed by another bridge, skipping");
                continue;
            }
            Err(e) => {
                warn!(job = %job_id, "claim attempt failed, will retry next tick: {}", e);
                continue;
            }
        }
    }

    true
}

/// Claim = conditional update: re-read the job, verify it is still queued,
/// then patch it to `printing`. Returns `Ok(false)` (not an error) if the
/// verification or patch indicates someone else already claimed it.
async fn claim_job(
    client: &FirestoreClient,
    collection_path: &str,
    job: &PrintJob,
    device_id: &str,
    device_name: &str,
) -> crate::errors::Result<bool> {
    let doc_path = format!("{}/{}", collection_path, job.id);

    let current = client.get(&doc_path).await?;
    let Some(current) = current else {
        return Ok(false);
    };
    let still_queued = current
        .fields
        .get("status")
        .and_then(TypedValue::as_str)
        .map(|s| s == STATUS_QUEUED)
        .unwrap_or(false);
    if !still_queued {
        return Ok(false);
    }

    let now = chrono::Utc::now().to_rfc3339();
    let mut fields = HashMap::new();
    fields.insert("status".to_string(), TypedValue::StringValue("printing".to_string()));
    fields.insert("claimedBy".to_string(), TypedValue::StringValue(device_id.to_string()));
    fields.insert(
        "claimedByName".to_string(),
        TypedValue::StringValue(device_name.to_string()),
    );
    fields.insert("claimedAt".to_string(), TypedValue::TimestampValue(now));
    fields.insert(
        "attempts".to_string(),
        TypedValue::IntegerValue(job.attempts as i64 + 1),
    );

    match client
        .patch(
            &doc_path,
            &["status", "claimedBy", "claimedByName", "claimedAt", "attempts"],
            fields,
        )
        .await
    {
        Ok(()) => Ok(true),
        Err(_) => Ok(false),
    }
}

/// Dispatch a claimed job to its transport and report the outcome.
async fn dispatch_and_report(client: &FirestoreClient, collection_path: &str, job: PrintJob) {
    let doc_path = format!("{}/{}", collection_path, job.id);
    let attempts = job.attempts + 1;
    let max_attempts = job.max_attempts;

    let outcome = dispatch(&job).await;

    match outcome {
        Ok(()) => report_success(client, &doc_path).await,
        Err(e) => report_failure(client, &doc_path, &e, attempts, max_attempts).await,
    }
}

/// Route the job's target to the appropriate transport. Missing required
/// sub-fields are non-retryable, whether caught before or after claim.
async fn dispatch(job: &PrintJob) -> crate::errors::Result<()> {
    if job.payload.len() > MAX_PAYLOAD_BYTES {
        return Err(DaemonError::PayloadTooLarge);
    }

    match &job.target {
        Target::Lan { ip, port } => {
            if ip.is_empty() {
                return Err(DaemonError::NoLanIp);
            }
            tcp::print_tcp(ip, *port, &job.payload).await
        }
        Target::OsPrinter { printer_name } => {
            if printer_name.is_empty() {
                return Err(DaemonError::NoPrinterName);
            }
            os_spooler::print_os(printer_name, &job.payload).await
        }
        Target::Unknown => Err(DaemonError::UnknownTarget("unrecognized target type".to_string())),
    }
}

async fn report_success(client: &FirestoreClient, doc_path: &str) {
    let mut fields = HashMap::new();
    fields.insert("status".to_string(), TypedValue::StringValue(STATUS_PRINTED.to_string()));
    fields.insert(
        "printedAt".to_string(),
        TypedValue::TimestampValue(chrono::Utc::now().to_rfc3339()),
    );
    fields.insert("error".to_string(), TypedValue::NullValue);

    if let Err(e) = client
        .patch(doc_path, &["status", "printedAt", "error"], fields)
        .await
    {
        warn!("failed to report success, will be retried as a no-op next tick: {}", e);
    }
}

async fn report_failure(
    client: &FirestoreClient,
    doc_path: &str,
    error: &DaemonError,
    attempts: u32,
    max_attempts: u32,
) {
    // Non-retryable error kinds are terminal regardless of remaining attempts.
    let non_retryable = matches!(
        error,
        DaemonError::NoLanIp
            | DaemonError::NoPrinterName
            | DaemonError::UnknownTarget(_)
            | DaemonError::PayloadTooLarge
    );

    if !non_retryable && attempts < max_attempts {
        let mut fields = HashMap::new();
        fields.insert("status".to_string(), TypedValue::StringValue(STATUS_QUEUED.to_string()));
        fields.insert("claimedBy".to_string(), TypedValue::NullValue);
        fields.insert("claimedByName".to_string(), TypedValue::NullValue);
        fields.insert("claimedAt".to_string(), TypedValue::NullValue);
        fields.insert(
            "error".to_string(),
            TypedValue::StringValue(format!("Retry: {}", error)),
        );

        if let Err(e) = client
            .patch(
                doc_path,
                &["status", "claimedBy", "claimedByName", "claimedAt", "error"],
                fields,
            )
            .await
        {
            warn!("failed to report retry, will be retried as a no-op next tick: {}", e);
        }
        return;
    }

    let mut fields = HashMap::new();
    fields.insert("status".to_string(), TypedValue::StringValue(STATUS_FAILED.to_string()));
    fields.insert("error".to_string(), TypedValue::StringValue(error.to_string()));

    if let Err(e) = client.patch(doc_path, &["status", "error"], fields).await {
        warn!("failed to report terminal failure, will be retried as a no-op next tick: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::model::ClaimMetadata;

    fn job_with_target(target: Target) -> PrintJob {
        PrintJob {
            id: "job1".to_string(),
            status: STATUS_QUEUED.to_string(),
            target,
            payload: b"Hi".to_vec(),
            paper_width: None,
            attempts: 0,
            max_attempts: 3,
            order_id: None,
            error: None,
            claim: ClaimMetadata { claimed_by: None, claimed_by_name: None, claimed_at: None },
        }
    }

    #[tokio::test]
    async fn lan_target_with_empty_ip_is_non_retryable() {
        let job = job_with_target(Target::Lan { ip: String::new(), port: 9100 });
        let result = dispatch(&job).await;
        assert!(matches!(result, Err(DaemonError::NoLanIp)));
    }

    #[tokio::test]
    async fn os_printer_target_with_empty_name_is_non_retryable() {
        let job = job_with_target(Target::OsPrinter { printer_name: String::new() });
        let result = dispatch(&job).await;
        assert!(matches!(result, Err(DaemonError::NoPrinterName)));
    }

    #[tokio::test]
    async fn unknown_target_is_non_retryable() {
        let job = job_with_target(Target::Unknown);
        let result = dispatch(&job).await;
        assert!(matches!(result, Err(DaemonError::UnknownTarget(_))));
    }

    #[tokio::test]
    async fn oversized_payload_is_rejected_before_dispatch() {
        let mut job = job_with_target(Target::Lan { ip: "10.0.0.5".to_string(), port: 9100 });
        job.payload = vec![0u8; MAX_PAYLOAD_BYTES + 1];
        let result = dispatch(&job).await;
        assert!(matches!(result, Err(DaemonError::PayloadTooLarge)));
    }

    #[tokio::test]
    async fn lan_target_dispatches_to_tcp_transport() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = listener.accept().await;
        });

        let job = job_with_target(Target::Lan { ip: addr.ip().to_string(), port: addr.port() });
        assert!(dispatch(&job).await.is_ok());
    }
}
