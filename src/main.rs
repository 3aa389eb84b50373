//! Demo binary: loads [`lwm2m_client_core::config::ClientConfig`], builds a
//! [`lwm2m_client_core::Core`] seeded with a minimal Device object, and
//! drives it with a loopback transport — the same
//! `tracing_subscriber::fmt().with_env_filter(...)` startup and
//! `#[tokio::main]` shape as the host application's `main.rs`, generalized
//! from an HTTP server loop to the cooperative single-threaded tick loop
//! described in §5.

use lwm2m_client_core::config::ClientConfig;
use lwm2m_client_core::definition::{Cardinality, ObjectDefinition, Operations, ResourceDefinition};
use lwm2m_client_core::server::ServerRecord;
use lwm2m_client_core::transport::LoopbackTransport;
use lwm2m_client_core::value::{Value, ValueKind};
use lwm2m_client_core::Core;
use tracing_subscriber::EnvFilter;

/// Instantiates every object named by `config.object_definition_sources`
/// (§6a: "resolved and fed to the definition registry before the object
/// store or any engine is constructed; a source that fails to parse is a
/// startup error, not a runtime one"). An unrecognized `object_id` is a
/// hard startup error rather than a silent skip.
///
/// With no sources configured at all, falls back to the demo Device object
/// so the binary stays useful with zero config.
fn load_object_definition_sources(core: &mut Core, config: &ClientConfig) -> anyhow::Result<()> {
    if config.object_definition_sources.is_empty() {
        return create_device_object(core);
    }
    for source in &config.object_definition_sources {
        match source.object_id {
            DEVICE_OBJECT_ID => create_device_object(core)?,
            other => anyhow::bail!("object_definition_sources: unrecognized object_id {other}"),
        }
    }
    Ok(())
}

fn create_device_object(core: &mut Core) -> anyhow::Result<()> {
    core.define_object(device_object()).expect("device object definition is valid");
    let device_iid = core.store.create_object_instance(&core.defs, DEVICE_OBJECT_ID, Some(0))?;
    tracing::debug!(device_iid, "created Device object instance");
    Ok(())
}

const DEVICE_OBJECT_ID: u16 = 3;
const RES_MANUFACTURER: u16 = 0;
const RES_MODEL_NUMBER: u16 = 1;
const RES_REBOOT: u16 = 4;
const RES_CURRENT_TIME: u16 = 13;

/// A deliberately minimal Device object (ID 3) so the demo has something
/// to register and observe. The full vendor Device/Firmware/Location/
/// Connectivity object set is out of scope (§1); this is just enough to
/// exercise the dispatcher and observation engine end to end.
fn device_object() -> ObjectDefinition {
    ObjectDefinition::new(DEVICE_OBJECT_ID, "Device", Cardinality::Single, true)
        .with_resource(ResourceDefinition {
            id: RES_MANUFACTURER,
            name: "Manufacturer",
            value_kind: ValueKind::String,
            cardinality: Cardinality::Single,
            mandatory: false,
            operations: Operations::READ_ONLY,
            default: Some(Value::String("Example Manufacturer".to_string())),
        })
        .with_resource(ResourceDefinition {
            id: RES_MODEL_NUMBER,
            name: "ModelNumber",
            value_kind: ValueKind::String,
            cardinality: Cardinality::Single,
            mandatory: false,
            operations: Operations::READ_ONLY,
            default: Some(Value::String("lwm2m-client-demo".to_string())),
        })
        .with_resource(ResourceDefinition {
            id: RES_REBOOT,
            name: "Reboot",
            value_kind: ValueKind::None,
            cardinality: Cardinality::Single,
            mandatory: false,
            operations: Operations::EXECUTABLE,
            default: None,
        })
        .with_resource(ResourceDefinition {
            id: RES_CURRENT_TIME,
            name: "CurrentTime",
            value_kind: ValueKind::Time,
            cardinality: Cardinality::Single,
            mandatory: false,
            operations: Operations::READ_WRITE,
            default: Some(Value::Time(0)),
        })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("lwm2m_client_core=debug")),
        )
        .init();

    let config_path = std::env::var("LWM2M_CLIENT_CONFIG").unwrap_or_else(|_| "./client.toml".to_string());
    let config = ClientConfig::load(&config_path)?;
    config.validate().map_err(|e| anyhow::anyhow!(e))?;
    tracing::info!(endpoint_name = %config.endpoint_name, "starting lwm2m client demo");

    let mut core = Core::new(&config);
    load_object_definition_sources(&mut core, &config)?;

    if let Some(factory) = &config.factory_bootstrap_config {
        core.add_server(ServerRecord::new(
            0,
            factory.short_server_id,
            factory.server_uri.clone(),
            factory.lifetime_secs,
        ));
    }

    let mut transport = LoopbackTransport::new();
    let mut tick_ms: u64 = 0;
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(1));

    let mut shutdown = std::pin::pin!(tokio::signal::ctrl_c());
    loop {
        tokio::select! {
            _ = interval.tick() => {
                core.tick(tick_ms, &mut transport);
                drain_outbound(&mut transport);
                tick_ms += 1_000;
            }
            _ = &mut shutdown => {
                tracing::info!("shutting down, deregistering active servers");
                core.shutdown(&mut transport);
                drain_outbound(&mut transport);
                break;
            }
        }
    }

    Ok(())
}

/// The loopback transport only records traffic; a real binary would hand
/// these to its CoAP socket. Logged here so the demo is observable.
fn drain_outbound(transport: &mut LoopbackTransport) {
    for (id, short_server_id, request) in transport.sent_requests.drain(..) {
        tracing::info!(id, short_server_id, method = ?request.method, uri = %request.uri, "outbound CoAP request");
    }
    for (token, observe_seq, content_format, payload) in transport.sent_responses.drain(..) {
        tracing::info!(
            token = ?token,
            observe_seq,
            content_format = ?content_format,
            len = payload.len(),
            "outbound CoAP response"
        );
    }
}
