use futures::stream::FuturesUnordered;

use crate::service::Wgadmin;

pub mod web;

pub fn run(
    web: web::Config,
    service: Wgadmin,
) -> FuturesUnordered<tokio::task::JoinHandle<Result<(), Box<dyn std::error::Error + Send + Sync>>>>
{
    let futures = FuturesUnordered::new();

    futures.push(tokio::spawn(web::start(web, service)));

    futures
}
