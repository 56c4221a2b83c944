use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use parking_lot::Mutex;
use reels_washer_core::error::AppError;
use reels_washer_core::job::{Job, QuickWash};
use reels_washer_core::pipeline::{CancellationToken, RunState, WashCallbacks};
use reels_washer_core::sidecar_api;
use serde::Deserialize;
use serde_json::{Value, json};

#[derive(Debug, Deserialize)]
struct RpcRequest {
    id: u64,
    method: String,
    #[serde(default)]
    params: Value,
}

#[derive(Debug, serde::Serialize)]
struct RpcSuccess {
    id: u64,
    result: Value,
}

#[derive(Debug, serde::Serialize)]
struct RpcFailure {
    id: u64,
    error: RpcErrorPayload,
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct RpcErrorPayload {
    summary: String,
    detail: String,
}

#[derive(Debug, serde::Serialize)]
struct RpcEvent {
    event: String,
    payload: Value,
}

#[derive(Debug, Clone)]
struct ActiveRun {
    run_id: u64,
    cancel: CancellationToken,
}

#[derive(Clone)]
struct RunRegistry {
    active_run: Arc<Mutex<Option<ActiveRun>>>,
    next_run_id: Arc<AtomicU64>,
}

impl RunRegistry {
    fn new() -> Self {
        Self {
            active_run: Arc::new(Mutex::new(None)),
            next_run_id: Arc::new(AtomicU64::new(1)),
        }
    }

    fn begin_run(&self) -> Result<ActiveRun, AppError> {
        let mut guard = self.active_run.lock();
        if let Some(existing) = guard.as_ref() {
            return Err(AppError::from(format!(
                "Another wash is already running (runId={})",
                existing.run_id
            )));
        }
        let run = ActiveRun {
            run_id: self.next_run_id.fetch_add(1, Ordering::Relaxed),
            cancel: CancellationToken::new(),
        };
        *guard = Some(run.clone());
        Ok(run)
    }

    fn finish_run(&self, run_id: u64) {
        let mut guard = self.active_run.lock();
        if guard.as_ref().is_some_and(|active| active.run_id == run_id) {
            *guard = None;
        }
    }

    fn current_run(&self) -> Option<ActiveRun> {
        self.active_run.lock().clone()
    }
}

struct ActiveRunGuard {
    registry: RunRegistry,
    run_id: u64,
}

impl ActiveRunGuard {
    fn new(registry: RunRegistry, run_id: u64) -> Self {
        Self { registry, run_id }
    }
}

impl Drop for ActiveRunGuard {
    fn drop(&mut self) {
        self.registry.finish_run(self.run_id);
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MediaInspectParams {
    input_path: PathBuf,
}

#[derive(Debug, Deserialize)]
struct WashPresetParams {
    kind: QuickWash,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WashStartParams {
    job: Option<Job>,
    job_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct WashCancelParams {
    run_id: Option<u64>,
}

type SharedWriter = Arc<Mutex<io::Stdout>>;

fn write_json_line<T: serde::Serialize>(writer: &mut impl Write, value: &T) -> io::Result<()> {
    serde_json::to_writer(&mut *writer, value)
        .map_err(|e| io::Error::other(format!("serialize response: {}", e)))?;
    writer.write_all(b"\n")?;
    writer.flush()
}

fn write_json_line_shared<T: serde::Serialize>(writer: &SharedWriter, value: &T) -> io::Result<()> {
    let mut guard = writer.lock();
    write_json_line(&mut *guard, value)
}

fn emit_rpc_event(writer: &SharedWriter, event: &str, payload: Value) {
    let message = RpcEvent {
        event: event.to_string(),
        payload,
    };
    let _ = write_json_line_shared(writer, &message);
}

fn parse_error_payload(err: &AppError) -> RpcErrorPayload {
    match err {
        AppError::Cancelled => RpcErrorPayload {
            summary: "Cancelled".to_string(),
            detail: "Cancelled".to_string(),
        },
        AppError::FfmpegFailed { code, stderr } if *code == -1 => RpcErrorPayload {
            summary: stderr.clone(),
            detail: stderr.clone(),
        },
        AppError::FfmpegFailed { code, stderr } => {
            let parsed = reels_washer_core::ffmpeg::parse_ffmpeg_error(stderr, Some(*code));
            RpcErrorPayload {
                summary: parsed.summary,
                detail: parsed.detail,
            }
        }
        _ => {
            let text = err.to_string();
            RpcErrorPayload {
                summary: text.clone(),
                detail: text,
            }
        }
    }
}

/// A failed run's reason is already the full message; pass it through unprefixed.
fn failed_run_error(reason: &str) -> AppError {
    AppError::from(reason)
}

fn params_from_value<T: serde::de::DeserializeOwned>(params: Value) -> Result<T, AppError> {
    serde_json::from_value(params)
        .map_err(|e| AppError::invalid_job(format!("Invalid params payload: {}", e)))
}

fn to_result_value<T: serde::Serialize>(value: T, what: &str) -> Result<Value, AppError> {
    serde_json::to_value(value)
        .map_err(|e| AppError::from(format!("Failed to serialize {}: {}", what, e)))
}

fn is_async_request(method: &str) -> bool {
    method == "wash.start"
}

fn dispatch_sync(method: &str, params: Value, runs: &RunRegistry) -> Result<Value, AppError> {
    match method {
        "app.capabilities" => to_result_value(sidecar_api::app_capabilities(), "app capabilities"),
        "media.inspect" => {
            let parsed: MediaInspectParams = params_from_value(params)?;
            let engine = sidecar_api::default_engine()?;
            let result = sidecar_api::inspect_media(engine.as_ref(), &parsed.input_path)?;
            to_result_value(result, "media info")
        }
        "wash.preset" => {
            let parsed: WashPresetParams = params_from_value(params)?;
            to_result_value(sidecar_api::quick_wash_preset(parsed.kind), "preset")
        }
        "wash.cancel" => {
            let parsed: WashCancelParams = if params.is_null() {
                WashCancelParams::default()
            } else {
                params_from_value(params)?
            };
            match (runs.current_run(), parsed.run_id) {
                (None, Some(run_id)) => Err(AppError::from(format!("Unknown runId: {}", run_id))),
                (None, None) => Ok(json!({ "cancelled": false, "runId": Value::Null })),
                (Some(active), Some(run_id)) if active.run_id != run_id => {
                    Err(AppError::from(format!("Unknown runId: {}", run_id)))
                }
                (Some(active), _) => {
                    active.cancel.request_stop();
                    Ok(json!({ "cancelled": true, "runId": active.run_id }))
                }
            }
        }
        _ => Err(AppError::from(format!("Unknown method: {}", method))),
    }
}

fn write_response(writer: &SharedWriter, id: u64, result: Result<Value, AppError>) {
    let response = match result {
        Ok(result) => serde_json::to_value(RpcSuccess { id, result })
            .map_err(|e| io::Error::other(format!("serialize success: {}", e))),
        Err(err) => serde_json::to_value(RpcFailure {
            id,
            error: parse_error_payload(&err),
        })
        .map_err(|e| io::Error::other(format!("serialize failure: {}", e))),
    };

    match response {
        Ok(value) => {
            let _ = write_json_line_shared(writer, &value);
        }
        Err(err) => {
            let failure = RpcFailure {
                id,
                error: RpcErrorPayload {
                    summary: "Serialization error".to_string(),
                    detail: err.to_string(),
                },
            };
            let _ = write_json_line_shared(writer, &failure);
        }
    }
}

fn handle_sync_request(request: RpcRequest, writer: &SharedWriter, runs: &RunRegistry) {
    let result = dispatch_sync(&request.method, request.params, runs);
    write_response(writer, request.id, result);
}

fn resolve_job(params: WashStartParams) -> Result<Job, AppError> {
    match (params.job, params.job_path) {
        (Some(job), _) => Ok(job),
        (None, Some(path)) => sidecar_api::load_job(path),
        (None, None) => Err(AppError::invalid_job("wash.start needs job or jobPath")),
    }
}

/// Runs a whole wash on the current thread, streaming events, then answers the request.
fn handle_async_wash(request: RpcRequest, writer: &SharedWriter, runs: &RunRegistry) {
    let job = match params_from_value::<WashStartParams>(request.params).and_then(resolve_job) {
        Ok(job) => job,
        Err(err) => {
            write_response(writer, request.id, Err(err));
            return;
        }
    };
    let engine = match sidecar_api::default_engine() {
        Ok(engine) => engine,
        Err(err) => {
            write_response(writer, request.id, Err(err));
            return;
        }
    };
    let active_run = match runs.begin_run() {
        Ok(run) => run,
        Err(err) => {
            write_response(writer, request.id, Err(err));
            return;
        }
    };
    let _run_guard = ActiveRunGuard::new(runs.clone(), active_run.run_id);
    let run_id = active_run.run_id;

    let status_writer = Arc::clone(writer);
    let progress_writer = Arc::clone(writer);
    let callbacks = WashCallbacks {
        on_status: Some(Arc::new(move |message: &str| {
            emit_rpc_event(
                &status_writer,
                "wash.status",
                json!({ "runId": run_id, "message": message }),
            );
        })),
        on_progress: Some(Arc::new(move |done: usize, total: usize| {
            emit_rpc_event(
                &progress_writer,
                "wash.progress",
                json!({ "runId": run_id, "current": done, "total": total }),
            );
        })),
    };

    let washer = sidecar_api::prepare_wash(job, engine, callbacks)
        .with_cancellation(active_run.cancel.clone());
    let report = washer.run();

    let result = match &report.state {
        RunState::Failed(reason) => {
            let err = failed_run_error(reason);
            let payload = parse_error_payload(&err);
            emit_rpc_event(
                writer,
                "wash.error",
                json!({ "runId": run_id, "summary": payload.summary, "detail": payload.detail }),
            );
            Err(err)
        }
        _ => {
            emit_rpc_event(
                writer,
                "wash.complete",
                json!({
                    "runId": run_id,
                    "state": report.state,
                    "succeeded": report.succeeded,
                    "requested": report.requested,
                }),
            );
            to_result_value(&report, "run report").map(|mut value| {
                if let Some(obj) = value.as_object_mut() {
                    obj.insert("runId".to_string(), json!(run_id));
                }
                value
            })
        }
    };
    write_response(writer, request.id, result);
}

fn init_logging() {
    let env = env_logger::Env::default().default_filter_or("info");
    let _ = env_logger::Builder::from_env(env)
        .target(env_logger::Target::Stderr)
        .try_init();
}

fn main() -> io::Result<()> {
    init_logging();
    log::info!(
        target: "reels_washer::sidecar",
        "reels-washer sidecar started (protocol v{})",
        sidecar_api::PROTOCOL_VERSION
    );

    let stdin = io::stdin();
    let stdout: SharedWriter = Arc::new(Mutex::new(io::stdout()));
    let runs = RunRegistry::new();
    let mut async_workers: Vec<thread::JoinHandle<()>> = Vec::new();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                let failure = RpcFailure {
                    id: 0,
                    error: RpcErrorPayload {
                        summary: "Invalid input stream".to_string(),
                        detail: err.to_string(),
                    },
                };
                let _ = write_json_line_shared(&stdout, &failure);
                continue;
            }
        };

        if line.trim().is_empty() {
            continue;
        }

        let request: RpcRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                let failure = RpcFailure {
                    id: 0,
                    error: RpcErrorPayload {
                        summary: "Invalid request".to_string(),
                        detail: err.to_string(),
                    },
                };
                let _ = write_json_line_shared(&stdout, &failure);
                continue;
            }
        };

        if is_async_request(&request.method) {
            let writer = Arc::clone(&stdout);
            let registry = runs.clone();
            let worker = thread::Builder::new()
                .name("reels-washer-run".to_string())
                .spawn(move || handle_async_wash(request, &writer, &registry))?;
            async_workers.push(worker);
        } else {
            handle_sync_request(request, &stdout, &runs);
        }
    }

    // Stdin closed: stop whatever is running and let it clean up.
    if let Some(active) = runs.current_run() {
        active.cancel.request_stop();
    }
    for worker in async_workers {
        let _ = worker.join();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preset_returns_effect_config() {
        let runs = RunRegistry::new();
        let value = dispatch_sync("wash.preset", json!({ "kind": "deep" }), &runs).expect("preset");
        assert_eq!(value["brightness"]["enabled"], json!(true));
        assert_eq!(value["fpsChange"]["enabled"], json!(true));
    }

    #[test]
    fn failed_run_reason_is_not_prefixed_twice() {
        let reason = AppError::invalid_job("copyCount must be between 1 and 100").to_string();
        let payload = parse_error_payload(&failed_run_error(&reason));
        assert_eq!(payload.summary, "Invalid job: copyCount must be between 1 and 100");
        assert_eq!(payload.detail, payload.summary);
    }

    #[test]
    fn cancel_without_active_run() {
        let runs = RunRegistry::new();
        let value = dispatch_sync("wash.cancel", json!({}), &runs).expect("cancel");
        assert_eq!(value["cancelled"], json!(false));
        assert!(dispatch_sync("wash.cancel", json!({ "runId": 9 }), &runs).is_err());
    }

    #[test]
    fn cancel_stops_active_run() {
        let runs = RunRegistry::new();
        let run = runs.begin_run().expect("begin");
        let value =
            dispatch_sync("wash.cancel", json!({ "runId": run.run_id }), &runs).expect("cancel");
        assert_eq!(value["cancelled"], json!(true));
        assert!(run.cancel.is_stopped());
    }

    #[test]
    fn one_run_at_a_time() {
        let runs = RunRegistry::new();
        let first = runs.begin_run().expect("begin");
        assert!(runs.begin_run().is_err());
        {
            let _guard = ActiveRunGuard::new(runs.clone(), first.run_id);
        }
        assert!(runs.current_run().is_none());
        assert!(runs.begin_run().is_ok());
    }

    #[test]
    fn unknown_method_is_error() {
        let runs = RunRegistry::new();
        let err = dispatch_sync("wash.explode", Value::Null, &runs).expect_err("unknown");
        assert!(err.to_string().contains("Unknown method"));
    }
}
