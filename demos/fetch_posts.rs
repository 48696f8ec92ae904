use std::time::Duration;

use ingest_http::{ApiClient, CancellationToken, ClientConfig, UpstreamClient};
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Post {
    id: u64,
    user_id: u64,
    title: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("ingest_http=debug,info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = ClientConfig::from_env()?;
    if config.base_url.is_none() {
        config.base_url = Some("https://jsonplaceholder.typicode.com".to_owned());
    }
    let client = UpstreamClient::new(config)?;

    // Abandon the whole run if it takes longer than a minute.
    let cancel = CancellationToken::new();
    let deadline = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(60)).await;
        deadline.cancel();
    });

    let posts: Vec<Post> = client.get(&cancel, "/posts").await?;
    println!("fetched {} posts", posts.len());

    for post in posts.iter().take(5) {
        let detail: Post = client.get(&cancel, &format!("/posts/{}", post.id)).await?;
        println!("#{} by user {}: {}", detail.id, detail.user_id, detail.title);
    }

    client.close();
    Ok(())
}
