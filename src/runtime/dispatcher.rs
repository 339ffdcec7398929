//! Dispatcher - routes bridge envelopes from the UI to native handlers.
//!
//! Every inbound message goes through the same steps:
//! 1. Decode into a `BridgeEnvelope` (synchronously, in the caller)
//! 2. Look up the route in `ROUTES`, or apply the fallback policy
//! 3. Spawn the handler as a tokio task and return a `DispatchTicket`
//! 4. The task posts exactly one terminal result envelope
//!
//! `export_project_state_result` is itself a reply and posts nothing.

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::value::RawValue;
use serde_json::{json, Value};
use tokio::task::JoinHandle;

use crate::api::types::ApiError;
use crate::config::{FallbackPolicy, HostConfig, ToolsConfig};
use crate::protocols::envelope::{
    decode_object_text, decode_value, decode_verbatim, payload_str, BridgeEnvelope, DecodeError,
    DecodedMessage, ResultEnvelope,
    TYPE_ANALYZE_MATRIX_RESULT, TYPE_BRIDGE_ERROR, TYPE_IFC_EXPORT_RESULT, TYPE_UPDATE_RESULT,
};
use crate::protocols::host::{BridgeHost, SaveDialogRequest};
use crate::runtime::path::{file_timestamp, HostPaths, ScratchDir};
use crate::runtime::project_state::ProjectStateStore;
use crate::runtime::tool_runner::{read_output_json, ToolInvocation, ToolOutput, ToolRunner};
use crate::runtime::update_service::{ExecuteRequest, InstallRequest, UpdateService};

/// Scratch scopes
const SCOPE_IFC_EXPORT: &str = "ifc-export";
const SCOPE_WIND_ANALYSIS: &str = "wind-analysis";

const DEFAULT_UPLOAD_NAME: &str = "uploaded_file";

/// Native handler selected for an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    IfcExport,
    AnalyzeMatrix,
    ProjectStateResult,
    UpdateInstall,
    UpdateExecute,
}

impl Route {
    /// Type of the terminal reply, if the route sends one.
    pub fn reply_type(self) -> Option<&'static str> {
        match self {
            Route::IfcExport => Some(TYPE_IFC_EXPORT_RESULT),
            Route::AnalyzeMatrix => Some(TYPE_ANALYZE_MATRIX_RESULT),
            Route::ProjectStateResult => None,
            Route::UpdateInstall | Route::UpdateExecute => Some(TYPE_UPDATE_RESULT),
        }
    }
}

/// Inbound message types and their handlers.
pub const ROUTES: &[(&str, Route)] = &[
    ("ifc_export", Route::IfcExport),
    ("python_analyze_matrix", Route::AnalyzeMatrix),
    ("export_project_state_result", Route::ProjectStateResult),
    ("app_update_install", Route::UpdateInstall),
    ("app_update_execute", Route::UpdateExecute),
];

pub fn route_for(kind: &str) -> Option<Route> {
    ROUTES
        .iter()
        .find(|(name, _)| *name == kind)
        .map(|(_, route)| *route)
}

fn fallback_route(policy: FallbackPolicy) -> Option<Route> {
    match policy {
        FallbackPolicy::Reject => None,
        FallbackPolicy::IfcExport => Some(Route::IfcExport),
        FallbackPolicy::UpdateInstall => Some(Route::UpdateInstall),
    }
}

/// Receipt for one dispatched message.
pub struct DispatchTicket {
    /// Decoded message type (empty when the message had none)
    pub kind: String,
    /// Handler that was chosen; `None` means the message was rejected
    pub route: Option<Route>,
    /// Task running the handler
    pub handle: JoinHandle<()>,
}

/// Router shared by the `bridge_post` command.
pub struct Dispatcher {
    host: Arc<dyn BridgeHost>,
    paths: HostPaths,
    tools: ToolsConfig,
    fallback: FallbackPolicy,
    runner: ToolRunner,
    project_state: Arc<ProjectStateStore>,
    updates: Arc<UpdateService>,
}

impl Dispatcher {
    pub fn new(
        host: Arc<dyn BridgeHost>,
        paths: HostPaths,
        config: &HostConfig,
        project_state: Arc<ProjectStateStore>,
        updates: Arc<UpdateService>,
    ) -> Self {
        let runner = ToolRunner::new(paths.install_dir.clone());
        Self {
            host,
            paths,
            tools: config.tools.clone(),
            fallback: config.bridge.fallback,
            runner,
            project_state,
            updates,
        }
    }

    /// Decode and route one message.
    ///
    /// A string message keeps its payload text byte for byte. Returns as soon
    /// as the handler task is spawned. Must be called from within a tokio
    /// runtime.
    pub fn dispatch(self: &Arc<Self>, message: Value) -> DispatchTicket {
        let decoded = match message {
            Value::String(text) => decode_object_text(&text),
            other => decode_value(other).map(DecodedMessage::from),
        };
        self.route(decoded)
    }

    /// Dispatch raw message text.
    pub fn dispatch_text(self: &Arc<Self>, raw: &str) -> DispatchTicket {
        self.route(decode_verbatim(raw))
    }

    fn route(self: &Arc<Self>, decoded: Result<DecodedMessage, DecodeError>) -> DispatchTicket {
        match decoded {
            Ok(DecodedMessage {
                envelope,
                raw_payload,
            }) => match route_for(&envelope.kind) {
                Some(route) => self.spawn_route(route, envelope, raw_payload),
                None => {
                    log::warn!("No handler for message type: {}", envelope.kind);
                    let reason = ApiError::UnsupportedType {
                        message_type: envelope.kind.clone(),
                    };
                    self.spawn_fallback(envelope, reason)
                }
            },
            Err(DecodeError::MissingType { document }) => {
                log::warn!("Bridge message has no type");
                let envelope = BridgeEnvelope::new("", document);
                self.spawn_fallback(
                    envelope,
                    ApiError::DecodeError {
                        message: "message has no 'type' field".to_string(),
                    },
                )
            }
            Err(e) => {
                log::warn!("Dropping undecodable bridge message: {e}");
                self.spawn_reject(
                    String::new(),
                    ApiError::DecodeError {
                        message: e.to_string(),
                    },
                )
            }
        }
    }

    fn spawn_fallback(
        self: &Arc<Self>,
        envelope: BridgeEnvelope,
        reason: ApiError,
    ) -> DispatchTicket {
        match fallback_route(self.fallback) {
            Some(route) => {
                log::warn!(
                    "Routing unrecognized message via fallback: type={:?}, route={route:?}",
                    envelope.kind
                );
                self.spawn_route(route, envelope, None)
            }
            None => self.spawn_reject(envelope.kind, reason),
        }
    }

    fn spawn_reject(&self, kind: String, reason: ApiError) -> DispatchTicket {
        let host = self.host.clone();
        let handle = tokio::spawn(async move {
            host.post(ResultEnvelope::failed(TYPE_BRIDGE_ERROR, reason.to_string()).into());
        });
        DispatchTicket {
            kind,
            route: None,
            handle,
        }
    }

    fn spawn_route(
        self: &Arc<Self>,
        route: Route,
        envelope: BridgeEnvelope,
        raw_payload: Option<Box<RawValue>>,
    ) -> DispatchTicket {
        log::info!("Dispatching bridge message: type={}, route={route:?}", envelope.kind);

        let kind = envelope.kind;
        let payload = envelope.payload;
        let dispatcher = Arc::clone(self);
        let host = self.host.clone();

        let handle = tokio::spawn(async move {
            let task = tokio::spawn(async move {
                dispatcher.run_route(route, payload, raw_payload).await
            });
            match task.await {
                Ok(Some(reply)) => host.post(reply.into()),
                Ok(None) => {}
                Err(e) => {
                    log::error!("Bridge handler failed: route={route:?}, error={e}");
                    if let Some(reply_type) = route.reply_type() {
                        host.post(ResultEnvelope::failed(reply_type, "Internal error").into());
                    }
                }
            }
        });

        DispatchTicket {
            kind,
            route: Some(route),
            handle,
        }
    }

    async fn run_route(
        &self,
        route: Route,
        payload: Value,
        raw_payload: Option<Box<RawValue>>,
    ) -> Option<ResultEnvelope> {
        match route {
            Route::IfcExport => Some(match self.export_ifc(&payload).await {
                Ok(Some(path)) => {
                    ResultEnvelope::ok(TYPE_IFC_EXPORT_RESULT).with_path(path.display().to_string())
                }
                Ok(None) => ResultEnvelope::failed(TYPE_IFC_EXPORT_RESULT, "Export cancelled"),
                Err(e) => {
                    log::error!("IFC export failed: {e}");
                    ResultEnvelope::failed(TYPE_IFC_EXPORT_RESULT, e.to_string())
                }
            }),
            Route::AnalyzeMatrix => Some(match self.analyze_matrix(&payload).await {
                Ok(data) => ResultEnvelope::ok(TYPE_ANALYZE_MATRIX_RESULT).with_data(data),
                Err(e) => {
                    log::error!("Matrix analysis failed: {e}");
                    ResultEnvelope::failed(TYPE_ANALYZE_MATRIX_RESULT, e.to_string())
                }
            }),
            Route::ProjectStateResult => {
                let document =
                    raw_payload.or_else(|| serde_json::value::to_raw_value(&payload).ok());
                self.project_state.complete_export(document.as_deref()).await;
                None
            }
            Route::UpdateInstall => {
                let request = InstallRequest::from_payload(&payload);
                Some(match self.updates.install(self.host.as_ref(), request).await {
                    Ok(outcome) => ResultEnvelope::ok(TYPE_UPDATE_RESULT)
                        .with_message(outcome.message())
                        .with_path(outcome.path.display().to_string()),
                    Err(e) => {
                        log::error!("Update install failed: {e}");
                        ResultEnvelope::failed(TYPE_UPDATE_RESULT, e.to_string())
                    }
                })
            }
            Route::UpdateExecute => {
                let request = ExecuteRequest::from_payload(&payload);
                Some(match self.updates.execute(request) {
                    Ok(pid) => ResultEnvelope::ok(TYPE_UPDATE_RESULT)
                        .with_message(format!("Installer started (pid {pid})")),
                    Err(e) => {
                        log::error!("Update execute failed: {e}");
                        ResultEnvelope::failed(TYPE_UPDATE_RESULT, e.to_string())
                    }
                })
            }
        }
    }

    /// Resolve a packaged tool, failing before any work is staged.
    fn tool_path(&self, name: &str) -> Result<PathBuf, ApiError> {
        let path = self.paths.executable(name);
        if path.is_file() {
            Ok(path)
        } else {
            Err(ApiError::ToolNotFound {
                path: path.display().to_string(),
            })
        }
    }

    /// `ifc_export`: `Ok(None)` when the user cancelled the save dialog.
    async fn export_ifc(&self, payload: &Value) -> Result<Option<PathBuf>, ApiError> {
        if payload.get("buildings").is_none() {
            return Err(ApiError::InvalidInput {
                message: "Invalid payload: missing 'buildings'".to_string(),
            });
        }
        let exe = self.tool_path(&self.tools.ifc_exporter)?;

        let request = SaveDialogRequest {
            title: "Save IFC file".to_string(),
            file_name: format!("ArchiPlaning_Export_{}.ifc", file_timestamp()),
            filter_name: "IFC file".to_string(),
            extensions: vec!["ifc".to_string()],
            directory: self.paths.documents_dir.clone(),
        };
        let Some(output) = self.host.pick_save_path(request).await else {
            log::info!("IFC export cancelled by user");
            return Ok(None);
        };

        let scratch = ScratchDir::create(&self.paths.temp_root, SCOPE_IFC_EXPORT)?;
        let input = scratch.write_json("ifc_export.json", payload)?;

        let invocation = ToolInvocation::new(exe)
            .opt("--input", &input)
            .opt("--output", &output)
            .input(&input)
            .output(&output);
        let result = self.runner.run(&invocation).await?;

        if !result.succeeded() {
            let log_path = self.write_export_error_log(&result).await;
            let mut message = match result.exit_code {
                Some(code) => format!("IFC export failed with exit code {code}."),
                None => "IFC export was terminated.".to_string(),
            };
            if let Some(log_path) = log_path {
                message.push_str(&format!("\nDetails: {}", log_path.display()));
            }
            self.host.notify_error("Export failed", &message);
        }

        result.into_success()?;
        log::info!("IFC exported to {}", output.display());
        Ok(Some(output))
    }

    async fn write_export_error_log(&self, result: &ToolOutput) -> Option<PathBuf> {
        let path = self
            .paths
            .error_log_dir
            .join(format!("ArchiPlaning_Error_{}.log", file_timestamp()));
        let exit_code = result
            .exit_code
            .map(|code| code.to_string())
            .unwrap_or_else(|| "none".to_string());
        let content = format!(
            "=== Export failed ===\nTime: {}\nExit code: {exit_code}\n\nError output:\n{}\n\nStandard output:\n{}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
            result.stderr,
            result.stdout
        );

        if let Err(e) = tokio::fs::create_dir_all(&self.paths.error_log_dir).await {
            log::warn!("Failed to create error log dir: {e}");
        }
        match tokio::fs::write(&path, content).await {
            Ok(()) => {
                log::info!("Wrote export error log: {}", path.display());
                Some(path)
            }
            Err(e) => {
                log::warn!("Failed to write export error log {}: {e}", path.display());
                None
            }
        }
    }

    /// `python_analyze_matrix`: run the wind path analysis on one matrix.
    async fn analyze_matrix(&self, payload: &Value) -> Result<Value, ApiError> {
        let filename = payload_str(payload, "filename")
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_UPLOAD_NAME);
        let zone = payload_str(payload, "zone")
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ApiError::InvalidInput {
                message: "Missing required field: zone".to_string(),
            })?;
        let matrix = payload
            .get("matrix")
            .filter(|m| !m.is_null())
            .ok_or_else(|| ApiError::InvalidInput {
                message: "Missing required field: matrix".to_string(),
            })?;
        let exe = self.tool_path(&self.tools.analysis_cli)?;

        let scratch = ScratchDir::create(&self.paths.temp_root, SCOPE_WIND_ANALYSIS)?;
        let input = scratch.write_json("matrix.json", &json!({ "matrix": matrix }))?;
        let output = scratch.join("result.json");

        let invocation = ToolInvocation::new(exe)
            .opt("--matrix", &input)
            .opt("--json-key", "matrix")
            .opt("--zone", zone)
            .opt("--filename", filename)
            .opt("--output", &output)
            .arg("--print-summary")
            .input(&input)
            .output(&output);

        self.runner.run(&invocation).await?.into_success()?;
        read_output_json(&output).await
    }
}
