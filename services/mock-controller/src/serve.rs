//! Serving the router over mutually authenticated TLS.
//!
//! `axum::serve` only takes plain listeners, so connections are accepted
//! here, the client certificate is mapped to a [`PeerIdentity`], and each
//! request is handed to the router with that identity attached.

use std::sync::Arc;

use axum::Router;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;
use tower::ServiceExt;
use tracing::{debug, info, warn};

use crate::pki::{PeerIdentity, TestPki};

pub async fn serve_rest(
    listener: TcpListener,
    pki: Arc<TestPki>,
    app: Router,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let acceptor = TlsAcceptor::from(pki.server_config()?);
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (tcp, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!(error = %e, "REST accept failed");
                        continue;
                    }
                };
                let acceptor = acceptor.clone();
                let pki = Arc::clone(&pki);
                let app = app.clone();
                connections.spawn(async move {
                    let stream = match acceptor.accept(tcp).await {
                        Ok(stream) => stream,
                        Err(e) => {
                            debug!(%peer, error = %e, "REST TLS handshake failed");
                            return;
                        }
                    };
                    let identity = pki.identify(stream.get_ref().1.peer_certificates());
                    serve_connection(stream, identity, app).await;
                });
            }
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
            _ = shutdown.changed() => break,
        }
    }

    info!("REST listener shutting down");
    connections.shutdown().await;
    Ok(())
}

async fn serve_connection<S>(stream: S, identity: Option<PeerIdentity>, app: Router)
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin + 'static,
{
    let service = service_fn(move |mut request: Request<Incoming>| {
        if let Some(identity) = &identity {
            request.extensions_mut().insert(identity.clone());
        }
        app.clone().oneshot(request)
    });

    if let Err(e) = http1::Builder::new()
        .serve_connection(TokioIo::new(stream), service)
        .await
    {
        debug!(error = %e, "REST connection ended with error");
    }
}
