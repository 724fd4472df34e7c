use crate::engine::{EngineError, EngineHandle};
use zbus::interface;

pub const BUS_NAME: &str = "org.facegate.FaceGate1";
pub const OBJECT_PATH: &str = "/org/facegate/FaceGate1";
pub const INTERFACE_NAME: &str = "org.facegate.FaceGate1";

/// D-Bus interface for the FaceGate daemon.
///
/// Bus name: org.facegate.FaceGate1
/// Object path: /org/facegate/FaceGate1
///
/// Register and Authenticate reply with a JSON outcome object rather
/// than a D-Bus error: a failed window ("no face detected") is a normal
/// user outcome, not a bus failure.
pub struct FaceGateService {
    engine: EngineHandle,
}

impl FaceGateService {
    pub fn new(engine: EngineHandle) -> Self {
        Self { engine }
    }
}

#[interface(name = "org.facegate.FaceGate1")]
impl FaceGateService {
    /// Run a registration window and append the averaged descriptor to
    /// the gallery.
    async fn register(&self) -> zbus::fdo::Result<String> {
        tracing::info!("register requested");
        let reply = match self.engine.register().await {
            Ok(out) => serde_json::json!({
                "ok": true,
                "gallery_len": out.gallery_len,
                "samples": out.samples,
            }),
            Err(e) => {
                tracing::warn!(error = %e, "register failed");
                serde_json::json!({ "ok": false, "error": e.to_string() })
            }
        };
        Ok(reply.to_string())
    }

    /// Run an authentication window against the stored gallery.
    async fn authenticate(&self) -> zbus::fdo::Result<String> {
        tracing::info!("authenticate requested");
        let reply = match self.engine.authenticate().await {
            Ok(out) => serde_json::json!({
                "ok": true,
                "accepted": out.outcome.accepted,
                "score": out.outcome.score,
                "best_index": out.outcome.best_index,
                "compared": out.outcome.compared,
                "skipped": out.outcome.skipped,
                "samples": out.samples,
            }),
            Err(e) => {
                tracing::warn!(error = %e, "authenticate failed");
                serde_json::json!({ "ok": false, "error": e.to_string() })
            }
        };
        Ok(reply.to_string())
    }

    /// List stored records as JSON summaries (timestamp and length only;
    /// descriptors never leave the daemon).
    async fn list_records(&self) -> zbus::fdo::Result<String> {
        let records = self.engine.list_records().await.map_err(to_fdo)?;
        let summaries: Vec<_> = records
            .iter()
            .map(|r| {
                serde_json::json!({
                    "timestamp": r.timestamp,
                    "descriptor_len": r.descriptor.len(),
                })
            })
            .collect();
        Ok(serde_json::Value::Array(summaries).to_string())
    }

    /// Drop the whole gallery; returns how many records were removed.
    async fn clear_records(&self) -> zbus::fdo::Result<u32> {
        let removed = self.engine.clear_records().await.map_err(to_fdo)?;
        Ok(removed as u32)
    }

    /// Daemon status snapshot.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let report = self.engine.status().await.map_err(to_fdo)?;
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "gallery_len": report.gallery_len,
            "policy": report.policy,
            "collecting": self.engine.is_collecting(),
        })
        .to_string())
    }
}

fn to_fdo(e: EngineError) -> zbus::fdo::Error {
    zbus::fdo::Error::Failed(e.to_string())
}
