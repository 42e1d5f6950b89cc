//! Serves a handful of fake requests concurrently. Each request gets its own
//! context; deep helpers read the user without it being passed down.
//!
//! Run with `RUST_LOG=request_scope=info,tedio_context=debug`.

use std::rc::Rc;
use std::time::Duration;

use serde_json::json;
use tedio_context::{ContextManager, ContextMiddleware, ContextService, Handle, Record, Runtime};
use tracing::info;
use tracing_subscriber::EnvFilter;

async fn load_profile(handle: Handle, service: ContextService) -> tedio_context::Result<String> {
    handle.sleep(Duration::from_millis(10)).await;
    let user: String = service.field("user")?.unwrap_or_default();
    service.set("profile_loaded", &true)?;
    Ok(format!("profile of {user}"))
}

async fn audit(service: ContextService) {
    info!(context = %service.get().to_value(), "audit");
}

fn main() -> tedio_context::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let rt = Runtime::new();
    let handle = rt.handle().clone();
    let manager = ContextManager::new(handle.clone());
    let middleware = ContextMiddleware::new(manager.clone());
    let service = ContextService::new(manager);

    let responses = rt.block_on({
        let service = service.clone();
        async move {
            let requests: Vec<_> = ["alice", "bob", "carol"]
                .into_iter()
                .enumerate()
                .map(|(n, user)| {
                    let context = Record::from_value(json!({ "user": user, "request": n }))?;
                    let handle = handle.clone();
                    let service = service.clone();
                    Ok(middleware.handle(Rc::new(context), move || async move {
                        let profile = load_profile(handle.clone(), service.clone()).await?;
                        handle.spawn(audit(service)).await;
                        Ok::<_, tedio_context::Error>(profile)
                    }))
                })
                .collect::<tedio_context::Result<_>>()?;

            let mut responses = Vec::new();
            for request in requests {
                responses.push(request.await?);
            }
            Ok::<_, tedio_context::Error>(responses)
        }
    })??;

    for response in responses {
        info!(%response, "served");
    }
    info!(context = %service.get().to_value(), "default context after serving");
    Ok(())
}
