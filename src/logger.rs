use crate::peer::types::IceCandidate;
use tracing::{debug, info, warn};
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Формат временных меток в логах
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Инициализация логирования с временными метками.
///
/// Уровень берётся из `RUST_LOG`, по умолчанию `relaycall=debug`.
/// Повторный вызов ничего не делает.
pub fn init() {
    // Проверяем конфигурацию логирования
    if !crate::config::LOGGING_ENABLED || !crate::config::dev::ENABLE_LOGGING {
        return;
    }

    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "relaycall=debug".into()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_timer(ChronoLocal::new(TIMESTAMP_FORMAT.to_string())),
        )
        .try_init();

    info!("Logging initialized (relaycall v{})", env!("CARGO_PKG_VERSION"));
}

/// Печать ICE-candidate при появлении (Trickle-ICE)
pub fn dump_candidate(label: &str, cand: &IceCandidate) {
    debug!(
        "Trickle {label}: candidate={} sdp_mid={:?} sdp_mline_index={:?} type={}",
        cand.candidate,
        cand.sdp_mid,
        cand.sdp_mline_index,
        cand.kind().unwrap_or("unknown")
    );
}

pub fn analyze_candidates(candidates: &[IceCandidate]) {
    let mut host_count = 0;
    let mut srflx_count = 0;
    let mut relay_count = 0;

    for candidate in candidates {
        match candidate.kind() {
            Some("host") => host_count += 1,
            Some("srflx") => srflx_count += 1,
            Some("relay") => relay_count += 1,
            _ => {}
        }
    }

    info!(
        "Candidate analysis: {} host, {} srflx, {} relay",
        host_count, srflx_count, relay_count
    );

    if relay_count == 0 {
        warn!("No TURN relay candidates found! Connection through NAT may fail.");
    }
}
