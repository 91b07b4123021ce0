//! Freshness prober against a real HTTP origin: a ServeDir-backed axum
//! server on an ephemeral port, answering HEAD with Content-Length and
//! Last-Modified like any static mirror.

use std::net::SocketAddr;
use std::path::Path;

use axum::Router;
use tower_http::services::ServeDir;

use urpm_core::cache::synthesis_path;
use urpm_core::freshness::FreshnessProber;
use urpm_core::model::MediaDescriptor;

async fn spawn_mirror(root: &Path) -> SocketAddr {
    let app = Router::new().fallback_service(ServeDir::new(root.to_path_buf()));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

fn media_for(addr: SocketAddr) -> MediaDescriptor {
    MediaDescriptor {
        name: "main".into(),
        url: format!("http://{addr}/"),
        enabled: true,
        update_media: false,
        last_sync: None,
        package_count: 0,
    }
}

/// Write the upstream synthesis index under the mirror root.
fn write_remote(root: &Path, bytes: &[u8]) {
    let dir = root.join("media_info");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("synthesis.hdlist.cz"), bytes).unwrap();
}

#[tokio::test]
async fn identical_local_copy_is_unchanged_and_stays_unchanged() {
    let remote_root = tempfile::tempdir().unwrap();
    let base = tempfile::tempdir().unwrap();
    write_remote(remote_root.path(), b"synthesis-index-v1");

    let addr = spawn_mirror(remote_root.path()).await;
    let media = media_for(addr);

    // Local copy written after the remote: same size, not older.
    let local = synthesis_path(base.path(), &media.url, &media.name);
    std::fs::create_dir_all(local.parent().unwrap()).unwrap();
    std::fs::write(&local, b"synthesis-index-v1").unwrap();

    let prober = FreshnessProber::new(base.path()).unwrap();
    assert!(!prober.synthesis_changed(&media).await);
    // Probing an unchanged remote twice yields the same decision.
    assert!(!prober.synthesis_changed(&media).await);
}

#[tokio::test]
async fn remote_size_change_forces_resync() {
    let remote_root = tempfile::tempdir().unwrap();
    let base = tempfile::tempdir().unwrap();
    write_remote(remote_root.path(), b"synthesis-index-v1");

    let addr = spawn_mirror(remote_root.path()).await;
    let media = media_for(addr);

    let local = synthesis_path(base.path(), &media.url, &media.name);
    std::fs::create_dir_all(local.parent().unwrap()).unwrap();
    std::fs::write(&local, b"synthesis-index-v1").unwrap();

    // Upstream publishes a bigger index.
    write_remote(remote_root.path(), b"synthesis-index-v2-much-longer");

    let prober = FreshnessProber::new(base.path()).unwrap();
    assert!(prober.synthesis_changed(&media).await);
}

#[tokio::test]
async fn missing_remote_fails_open_to_changed() {
    let remote_root = tempfile::tempdir().unwrap();
    let base = tempfile::tempdir().unwrap();
    // Mirror root exists but holds no synthesis file: HEAD answers 404.
    let addr = spawn_mirror(remote_root.path()).await;
    let media = media_for(addr);

    let local = synthesis_path(base.path(), &media.url, &media.name);
    std::fs::create_dir_all(local.parent().unwrap()).unwrap();
    std::fs::write(&local, b"synthesis-index-v1").unwrap();

    let prober = FreshnessProber::new(base.path()).unwrap();
    assert!(prober.synthesis_changed(&media).await);
}
