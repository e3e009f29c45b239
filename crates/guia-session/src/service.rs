use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{instrument, warn};

use guia_catalog::Catalog;
use guia_core::{Estado, SessionId, DEFAULT_AREA_ID, DEFAULT_PRO_ID, FALLBACK_ENTRY_NODE};
use guia_store::sessions::{ListField, SessionPatch, SessionRepo, SessionRow};

use crate::error::ServiceError;

#[derive(Clone, Debug, Default, Deserialize)]
pub struct StartRequest {
    pub pro_id: Option<String>,
    pub area_id: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct StartedSession {
    pub session_id: SessionId,
    pub pro_id: String,
    pub area_id: String,
    pub current_node: String,
    pub estado: Estado,
}

/// Client-submitted partial update. Fields left out of the request body stay
/// untouched; present fields replace the stored value wholesale.
///
/// `estado` arrives as a raw string so unknown statuses surface as a
/// validation error rather than a deserialization failure.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct UpdateRequest {
    pub estado: Option<String>,
    pub current_node: Option<String>,
    pub history: Option<Value>,
    pub decisiones: Option<Value>,
    pub bloqueos: Option<Value>,
    pub inputs: Option<Value>,
    pub logs: Option<Value>,
}

#[derive(Clone, Debug, Serialize)]
pub struct UpdateAck {
    pub ok: bool,
    pub updated_at: String,
}

/// Full session record as served to clients.
#[derive(Clone, Debug, Serialize)]
pub struct SessionView {
    pub session_id: SessionId,
    pub pro_id: String,
    pub area_id: String,
    pub estado: Estado,
    pub current_node: String,
    pub history: Value,
    pub decisiones: Value,
    pub bloqueos: Value,
    pub inputs: Value,
    pub logs: Value,
    pub created_at: String,
    pub updated_at: String,
}

/// Self-contained export snapshot. The shape is the durable deliverable
/// handed to users — changes here break downloaded artifacts.
#[derive(Clone, Debug, Serialize)]
pub struct Export {
    pub proceso: String,
    pub session_id: SessionId,
    pub pro_id: String,
    pub area_id: String,
    pub estado: Estado,
    pub current_node: String,
    pub created_at: String,
    pub updated_at: String,
    pub history: Value,
    pub decisiones: Value,
    pub bloqueos: Value,
    pub inputs: Value,
    pub logs: Value,
    pub export_ts: String,
}

impl Export {
    /// Download filename hint: procedure id plus the short session id.
    pub fn filename(&self) -> String {
        format!("{}_{}.json", self.pro_id, self.session_id.short())
    }
}

/// The session lifecycle: creation at a procedure's entry step, validated
/// partial updates, append-only audit operations, and export.
///
/// Holds no state of its own — every operation is a read-modify-write
/// against the store.
pub struct SessionService {
    repo: SessionRepo,
    catalog: Arc<Catalog>,
}

impl SessionService {
    pub fn new(repo: SessionRepo, catalog: Arc<Catalog>) -> Self {
        Self { repo, catalog }
    }

    /// Create a session at the resolved procedure's entry step. An unknown
    /// procedure id is not an error: the session starts at the legacy
    /// fallback step and keeps the id the caller asked for.
    #[instrument(skip(self, req))]
    pub fn start_session(&self, req: StartRequest) -> Result<StartedSession, ServiceError> {
        let pro_id = req.pro_id.unwrap_or_else(|| DEFAULT_PRO_ID.to_string());
        let area_id = req.area_id.unwrap_or_else(|| DEFAULT_AREA_ID.to_string());

        let entry_node = match self.catalog.resolve(&pro_id) {
            Some(procedure) => procedure.entry_node.clone(),
            None => {
                warn!(%pro_id, "procedure not in catalog, using fallback entry step");
                FALLBACK_ENTRY_NODE.to_string()
            }
        };

        let id = SessionId::new();
        let row = self.repo.create(&id, &pro_id, &area_id, &entry_node)?;

        Ok(StartedSession {
            session_id: row.id,
            pro_id: row.pro_id,
            area_id: row.area_id,
            current_node: row.current_node,
            estado: row.estado,
        })
    }

    /// Read-through view of a session.
    pub fn get_session_view(&self, id: &SessionId) -> Result<SessionView, ServiceError> {
        Ok(view_of(self.repo.get(id)?))
    }

    /// Apply a partial update. Validation happens before anything is
    /// persisted; on any validation failure the session is unchanged.
    #[instrument(skip(self, req), fields(session_id = %id))]
    pub fn apply_update(
        &self,
        id: &SessionId,
        req: UpdateRequest,
    ) -> Result<UpdateAck, ServiceError> {
        let estado = match &req.estado {
            Some(raw) => Some(raw.parse::<Estado>().map_err(ServiceError::Validation)?),
            None => None,
        };

        require_shape(req.history.as_ref(), Value::is_array, "history", "a JSON array")?;
        require_shape(req.decisiones.as_ref(), Value::is_array, "decisiones", "a JSON array")?;
        require_shape(req.bloqueos.as_ref(), Value::is_array, "bloqueos", "a JSON array")?;
        require_shape(req.logs.as_ref(), Value::is_array, "logs", "a JSON array")?;
        require_shape(req.inputs.as_ref(), Value::is_object, "inputs", "a JSON object")?;

        // The step check needs the session's procedure, so the read doubles
        // as the NotFound probe — no side effects for unknown ids.
        let prev = self.repo.get(id)?;
        if let Some(node) = &req.current_node {
            self.validate_node(&prev.pro_id, node)?;
        }

        let patch = SessionPatch {
            estado,
            current_node: req.current_node,
            history: req.history,
            decisiones: req.decisiones,
            bloqueos: req.bloqueos,
            inputs: req.inputs,
            logs: req.logs,
        };
        let row = self.repo.replace_fields(id, &patch)?;

        Ok(UpdateAck {
            ok: true,
            updated_at: row.updated_at,
        })
    }

    pub fn append_history(&self, id: &SessionId, entry: Value) -> Result<UpdateAck, ServiceError> {
        self.append(id, ListField::History, entry)
    }

    pub fn append_decision(&self, id: &SessionId, entry: Value) -> Result<UpdateAck, ServiceError> {
        self.append(id, ListField::Decisiones, entry)
    }

    pub fn append_blocker(&self, id: &SessionId, entry: Value) -> Result<UpdateAck, ServiceError> {
        self.append(id, ListField::Bloqueos, entry)
    }

    pub fn append_log(&self, id: &SessionId, entry: Value) -> Result<UpdateAck, ServiceError> {
        self.append(id, ListField::Logs, entry)
    }

    fn append(
        &self,
        id: &SessionId,
        field: ListField,
        entry: Value,
    ) -> Result<UpdateAck, ServiceError> {
        let row = self.repo.append_entry(id, field, entry)?;
        Ok(UpdateAck {
            ok: true,
            updated_at: row.updated_at,
        })
    }

    /// Set a single input field without resending the whole map.
    pub fn set_input(
        &self,
        id: &SessionId,
        key: &str,
        value: Value,
    ) -> Result<UpdateAck, ServiceError> {
        if key.trim().is_empty() {
            return Err(ServiceError::Validation(
                "input key must not be empty".to_string(),
            ));
        }
        let row = self.repo.set_input(id, key, value)?;
        Ok(UpdateAck {
            ok: true,
            updated_at: row.updated_at,
        })
    }

    /// Point-in-time snapshot bundled with catalog display metadata. Does
    /// not mutate the session.
    #[instrument(skip(self), fields(session_id = %id))]
    pub fn export_session(&self, id: &SessionId) -> Result<Export, ServiceError> {
        let row = self.repo.get(id)?;

        let proceso = match self.catalog.resolve(&row.pro_id) {
            Some(procedure) => format!("{} – {}", row.pro_id, procedure.nombre),
            None => row.pro_id.clone(),
        };

        Ok(Export {
            proceso,
            session_id: row.id,
            pro_id: row.pro_id,
            area_id: row.area_id,
            estado: row.estado,
            current_node: row.current_node,
            created_at: row.created_at,
            updated_at: row.updated_at,
            history: row.history,
            decisiones: row.decisiones,
            bloqueos: row.bloqueos,
            inputs: row.inputs,
            logs: row.logs,
            export_ts: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        })
    }

    /// Liveness of the underlying store, for health reporting.
    pub fn ping(&self) -> bool {
        self.repo.ping()
    }

    fn validate_node(&self, pro_id: &str, node: &str) -> Result<(), ServiceError> {
        match self.catalog.resolve(pro_id) {
            Some(procedure) if !procedure.has_node(node) => Err(ServiceError::Validation(
                format!("unknown step {node} for procedure {pro_id}"),
            )),
            // Sessions whose procedure no longer resolves keep the legacy
            // unvalidated behavior.
            _ => Ok(()),
        }
    }
}

fn require_shape(
    value: Option<&Value>,
    check: fn(&Value) -> bool,
    field: &str,
    expected: &str,
) -> Result<(), ServiceError> {
    match value {
        Some(v) if !check(v) => Err(ServiceError::Validation(format!(
            "{field} must be {expected}"
        ))),
        _ => Ok(()),
    }
}

fn view_of(row: SessionRow) -> SessionView {
    SessionView {
        session_id: row.id,
        pro_id: row.pro_id,
        area_id: row.area_id,
        estado: row.estado,
        current_node: row.current_node,
        history: row.history,
        decisiones: row.decisiones,
        bloqueos: row.bloqueos,
        inputs: row.inputs,
        logs: row.logs,
        created_at: row.created_at,
        updated_at: row.updated_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use guia_store::Database;
    use serde_json::json;
    use std::path::PathBuf;

    fn write_catalog_fixture() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("guia-session-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(dir.join("nodos")).unwrap();
        std::fs::write(
            dir.join("areas.json"),
            serde_json::to_string(&json!({
                "areas": [
                    {"id": "inventario", "nombre": "Inventario", "pros": ["PRO141"]},
                    {"id": "mantenimiento", "nombre": "Mantenimiento", "pros": ["PRO114"]}
                ],
                "pros": {
                    "PRO141": {
                        "nombre": "Tratamiento de materiales obsoletos y análisis de obsolescencia",
                        "inicio": "S0_alcance",
                        "nodos": "PRO141.json"
                    },
                    "PRO114": {
                        "nombre": "Revisión de equipos críticos",
                        "inicio": "S0_inicio",
                        "nodos": "PRO114.json"
                    }
                }
            }))
            .unwrap(),
        )
        .unwrap();
        std::fs::write(
            dir.join("nodos").join("PRO141.json"),
            serde_json::to_string(&json!({
                "S0_alcance": {"titulo": "Definir alcance"},
                "S1_identificacion": {"titulo": "Identificar materiales"},
                "S9_fin": {"titulo": "Cierre", "type": "end"}
            }))
            .unwrap(),
        )
        .unwrap();
        std::fs::write(
            dir.join("nodos").join("PRO114.json"),
            serde_json::to_string(&json!({
                "S0_inicio": {"titulo": "Inicio de revisión"},
                "S1_check": {"titulo": "Comprobación"}
            }))
            .unwrap(),
        )
        .unwrap();
        dir
    }

    struct Fixture {
        service: SessionService,
        dir: PathBuf,
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.dir);
        }
    }

    fn setup() -> Fixture {
        let dir = write_catalog_fixture();
        let catalog = Arc::new(Catalog::load(&dir).unwrap());
        let repo = SessionRepo::new(Database::in_memory().unwrap());
        Fixture {
            service: SessionService::new(repo, catalog),
            dir,
        }
    }

    #[test]
    fn start_session_uses_resolved_entry_step() {
        let fx = setup();
        let started = fx
            .service
            .start_session(StartRequest {
                pro_id: Some("PRO114".to_string()),
                area_id: Some("mantenimiento".to_string()),
            })
            .unwrap();
        assert_eq!(started.pro_id, "PRO114");
        assert_eq!(started.area_id, "mantenimiento");
        assert_eq!(started.current_node, "S0_inicio");
        assert_eq!(started.estado, Estado::EnCurso);
    }

    #[test]
    fn start_session_defaults_to_legacy_procedure() {
        let fx = setup();
        let started = fx.service.start_session(StartRequest::default()).unwrap();
        assert_eq!(started.pro_id, "PRO141");
        assert_eq!(started.area_id, "inventario");
        assert_eq!(started.current_node, "S0_alcance");
    }

    #[test]
    fn start_session_unknown_procedure_falls_back() {
        let fx = setup();
        let started = fx
            .service
            .start_session(StartRequest {
                pro_id: Some("PRO999".to_string()),
                area_id: None,
            })
            .unwrap();
        // The requested id is kept; only the entry step degrades.
        assert_eq!(started.pro_id, "PRO999");
        assert_eq!(started.current_node, "S0_alcance");
    }

    #[test]
    fn view_roundtrips_update() {
        let fx = setup();
        let started = fx.service.start_session(StartRequest::default()).unwrap();
        let history = json!([{"nodo": "S0_alcance"}]);

        fx.service
            .apply_update(
                &started.session_id,
                UpdateRequest {
                    current_node: Some("S1_identificacion".to_string()),
                    history: Some(history.clone()),
                    ..Default::default()
                },
            )
            .unwrap();

        let view = fx.service.get_session_view(&started.session_id).unwrap();
        assert_eq!(view.current_node, "S1_identificacion");
        assert_eq!(view.history, history);
        assert_eq!(view.estado, Estado::EnCurso);
    }

    #[test]
    fn update_unknown_estado_is_validation_error() {
        let fx = setup();
        let started = fx.service.start_session(StartRequest::default()).unwrap();
        let result = fx.service.apply_update(
            &started.session_id,
            UpdateRequest {
                estado: Some("TERMINADO".to_string()),
                ..Default::default()
            },
        );
        assert!(matches!(result, Err(ServiceError::Validation(_))));

        // Session unchanged.
        let view = fx.service.get_session_view(&started.session_id).unwrap();
        assert_eq!(view.estado, Estado::EnCurso);
    }

    #[test]
    fn update_node_outside_graph_is_validation_error() {
        let fx = setup();
        let started = fx.service.start_session(StartRequest::default()).unwrap();
        let result = fx.service.apply_update(
            &started.session_id,
            UpdateRequest {
                current_node: Some("S42_invent".to_string()),
                ..Default::default()
            },
        );
        assert!(matches!(result, Err(ServiceError::Validation(_))));
        let view = fx.service.get_session_view(&started.session_id).unwrap();
        assert_eq!(view.current_node, "S0_alcance");
    }

    #[test]
    fn update_node_skips_validation_for_unresolved_procedure() {
        let fx = setup();
        let started = fx
            .service
            .start_session(StartRequest {
                pro_id: Some("PRO999".to_string()),
                area_id: None,
            })
            .unwrap();
        // No catalog entry: the walk is the client's responsibility.
        let ack = fx
            .service
            .apply_update(
                &started.session_id,
                UpdateRequest {
                    current_node: Some("whatever".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(ack.ok);
    }

    #[test]
    fn update_with_wrong_shape_is_validation_error() {
        let fx = setup();
        let started = fx.service.start_session(StartRequest::default()).unwrap();

        for req in [
            UpdateRequest {
                history: Some(json!({"not": "a list"})),
                ..Default::default()
            },
            UpdateRequest {
                inputs: Some(json!([1, 2])),
                ..Default::default()
            },
            UpdateRequest {
                logs: Some(json!("nope")),
                ..Default::default()
            },
        ] {
            let result = fx.service.apply_update(&started.session_id, req);
            assert!(matches!(result, Err(ServiceError::Validation(_))));
        }
    }

    #[test]
    fn update_replaces_inputs_wholesale() {
        let fx = setup();
        let started = fx.service.start_session(StartRequest::default()).unwrap();

        fx.service
            .apply_update(
                &started.session_id,
                UpdateRequest {
                    inputs: Some(json!({"a": 1})),
                    ..Default::default()
                },
            )
            .unwrap();
        fx.service
            .apply_update(
                &started.session_id,
                UpdateRequest {
                    inputs: Some(json!({"b": 2})),
                    ..Default::default()
                },
            )
            .unwrap();

        let view = fx.service.get_session_view(&started.session_id).unwrap();
        assert_eq!(view.inputs, json!({"b": 2}));
        assert_eq!(view.history, json!([]));
    }

    #[test]
    fn operations_on_unknown_session_are_not_found() {
        let fx = setup();
        let id = SessionId::from_raw("missing");
        assert!(matches!(
            fx.service.get_session_view(&id),
            Err(ServiceError::NotFound)
        ));
        assert!(matches!(
            fx.service.apply_update(&id, UpdateRequest::default()),
            Err(ServiceError::NotFound)
        ));
        assert!(matches!(
            fx.service.export_session(&id),
            Err(ServiceError::NotFound)
        ));
        assert!(matches!(
            fx.service.append_log(&id, json!({})),
            Err(ServiceError::NotFound)
        ));
    }

    #[test]
    fn append_operations_accumulate() {
        let fx = setup();
        let started = fx.service.start_session(StartRequest::default()).unwrap();
        let id = &started.session_id;

        fx.service.append_history(id, json!("S0_alcance")).unwrap();
        fx.service
            .append_decision(id, json!({"nodo": "S1", "opcion": "si"}))
            .unwrap();
        fx.service
            .append_blocker(id, json!({"motivos": ["repuesto"]}))
            .unwrap();
        fx.service.append_log(id, json!({"tipo": "AVANCE"})).unwrap();
        fx.service.append_log(id, json!({"tipo": "AVANCE"})).unwrap();

        let view = fx.service.get_session_view(id).unwrap();
        assert_eq!(view.history.as_array().unwrap().len(), 1);
        assert_eq!(view.decisiones.as_array().unwrap().len(), 1);
        assert_eq!(view.bloqueos.as_array().unwrap().len(), 1);
        assert_eq!(view.logs.as_array().unwrap().len(), 2);
    }

    #[test]
    fn set_input_rejects_empty_key() {
        let fx = setup();
        let started = fx.service.start_session(StartRequest::default()).unwrap();
        let result = fx.service.set_input(&started.session_id, "  ", json!(1));
        assert!(matches!(result, Err(ServiceError::Validation(_))));
    }

    #[test]
    fn export_bundles_display_metadata_and_roundtrips_fields() {
        let fx = setup();
        let started = fx.service.start_session(StartRequest::default()).unwrap();
        let inputs = json!({"cantidad": 3});
        fx.service
            .apply_update(
                &started.session_id,
                UpdateRequest {
                    inputs: Some(inputs.clone()),
                    ..Default::default()
                },
            )
            .unwrap();

        let before = fx.service.get_session_view(&started.session_id).unwrap();
        let export = fx.service.export_session(&started.session_id).unwrap();

        assert!(export.proceso.starts_with("PRO141 – Tratamiento"));
        assert_eq!(export.inputs, inputs);
        assert_eq!(export.history, before.history);
        assert_eq!(export.updated_at, before.updated_at);
        assert!(!export.export_ts.is_empty());
        assert_eq!(
            export.filename(),
            format!("PRO141_{}.json", started.session_id.short())
        );

        // Export does not mutate.
        let after = fx.service.get_session_view(&started.session_id).unwrap();
        assert_eq!(after.updated_at, before.updated_at);
    }

    #[test]
    fn export_of_unresolved_procedure_uses_bare_id() {
        let fx = setup();
        let started = fx
            .service
            .start_session(StartRequest {
                pro_id: Some("PRO999".to_string()),
                area_id: None,
            })
            .unwrap();
        let export = fx.service.export_session(&started.session_id).unwrap();
        assert_eq!(export.proceso, "PRO999");
    }

    #[test]
    fn updated_at_never_decreases() {
        let fx = setup();
        let started = fx.service.start_session(StartRequest::default()).unwrap();
        let mut prev = fx
            .service
            .get_session_view(&started.session_id)
            .unwrap()
            .updated_at;
        for _ in 0..3 {
            let ack = fx
                .service
                .apply_update(&started.session_id, UpdateRequest::default())
                .unwrap();
            assert!(ack.updated_at >= prev);
            prev = ack.updated_at;
        }
    }
}
