//! `cascade demo` command implementation.

use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;

use cascade::prelude::*;
use cascade::{RenderError, render_to_stream_with};
use clap::Args as ClapArgs;
use color_eyre::eyre::{Result, WrapErr};
use futures::StreamExt;
use smol::{LocalExecutor, Timer};
use tracing::{info, warn};

use crate::config::Config;

/// Arguments for the demo command.
#[derive(ClapArgs, Debug)]
pub struct Args {
    /// Configuration file (defaults to `cascade.toml` when present).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Delay between two sections becoming ready.
    #[arg(long)]
    delay_ms: Option<u64>,

    /// Abort the render after this many milliseconds.
    #[arg(long)]
    abort_after_ms: Option<u64>,

    /// Prefix for every generated id.
    #[arg(long)]
    prefix: Option<String>,

    /// Byte size above which a ready section is streamed out of order.
    #[arg(long)]
    chunk_size: Option<usize>,
}

/// Data the page waits on.
struct Sources {
    feed: Deferred<Vec<String>>,
    weather: Deferred<Node>,
    ads: Deferred<Node>,
}

/// Run the demo command.
pub fn run(args: Args) -> Result<()> {
    let config = Config::load(args.config.as_deref())?;
    let mut options = config.render;
    if let Some(prefix) = args.prefix {
        options.identifier_prefix = prefix;
    }
    if let Some(size) = args.chunk_size {
        options.progressive_chunk_size = size;
    }
    let delay = Duration::from_millis(args.delay_ms.unwrap_or(config.demo.delay_ms));
    let abort_after = args
        .abort_after_ms
        .or(config.demo.abort_after_ms)
        .map(Duration::from_millis);

    let executor = LocalExecutor::new();
    smol::block_on(executor.run(stream_page(&executor, options, delay, abort_after)))
}

async fn stream_page(
    executor: &LocalExecutor<'_>,
    options: RenderOptions,
    delay: Duration,
    abort_after: Option<Duration>,
) -> Result<()> {
    let sources = Sources {
        feed: Deferred::new(),
        weather: Deferred::new(),
        ads: Deferred::new(),
    };
    let user = Context::new(String::from("guest"));

    settle_after(executor, delay, {
        let feed = sources.feed.clone();
        move || {
            feed.resolve(vec![
                String::from("Streaming rendering lands"),
                String::from("Suspense boundaries explained"),
            ]);
        }
    });
    settle_after(executor, delay * 2, {
        let weather = sources.weather.clone();
        move || {
            weather.resolve(element("p").child("Sunny, 21°C").into());
        }
    });
    settle_after(executor, delay * 3, {
        let ads = sources.ads.clone();
        move || {
            ads.reject(anyhow::anyhow!("ad server unavailable"));
        }
    });

    let mut failures = 0usize;
    let callbacks = Callbacks::new()
        .on_error(move |error: &RenderError| {
            failures += 1;
            warn!(%error, "section failed, leaving it to the client");
            Some(format!("demo-{failures}"))
        })
        .on_shell_ready(|| info!("shell ready"))
        .on_all_ready(|| info!("all sections ready"));

    let mut stream = render_to_stream_with(page(&sources, &user), options, callbacks)
        .await
        .wrap_err("failed to render the shell")?;

    if let Some(limit) = abort_after {
        let request = stream.request().clone();
        settle_after(executor, limit, move || {
            info!(after = ?limit, "aborting render");
            request.abort(Some("demo deadline reached"));
        });
    }

    let mut stdout = io::stdout().lock();
    while let Some(chunk) = stream.next().await {
        stdout.write_all(&chunk?)?;
        stdout.flush()?;
    }
    writeln!(stdout)?;

    let stats = stream.request().stats();
    info!(
        tasks = stats.tasks_created,
        renders = stats.component_renders,
        aborted = stats.aborted_segments,
        "render finished"
    );
    Ok(())
}

fn settle_after(executor: &LocalExecutor<'_>, after: Duration, settle: impl FnOnce() + 'static) {
    executor
        .spawn(async move {
            Timer::after(after).await;
            settle();
        })
        .detach();
}

fn page(sources: &Sources, user: &Context<String>) -> Node {
    element("html")
        .children([
            Node::from(element("head").child(element("title").child("Cascade demo"))),
            Node::from(element("body").children([
                Node::from(element("h1").child("Cascade")),
                provider(user, String::from("Ada"), greeting(user)),
                suspense(element("p").child("Loading feed…"), feed(&sources.feed)),
                suspense(
                    element("p").child("Loading weather…"),
                    await_node(&sources.weather),
                ),
                suspense(element("aside").child("…"), await_node(&sources.ads)),
            ])),
        ])
        .into()
}

fn greeting(user: &Context<String>) -> Node {
    let user = user.clone();
    component("Greeting", move |scope| {
        Ok(element("p")
            .child(format!("Welcome back, {}", scope.read(&user)))
            .into())
    })
}

fn feed(items: &Deferred<Vec<String>>) -> Node {
    let items = items.clone();
    component("Feed", move |scope| {
        let items = scope.wait(&items)?;
        Ok(element("ul")
            .children(items.into_iter().map(|item| element("li").child(item)))
            .into())
    })
}
