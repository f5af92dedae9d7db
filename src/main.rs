mod cli;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use cli::{Cli, Commands};

use tf_av::ToolRegistry;
use tf_core::config::Config;
use tf_core::JobId;
use tf_db::StatusFilter;
use tf_server::{AppContext, Dispatcher, SubmitRequest};

struct SubmitArgs {
    kind: String,
    inputs: Vec<PathBuf>,
    output: Option<PathBuf>,
    params: Option<String>,
    callback: Option<String>,
    wait: bool,
    timeout: Option<u64>,
}

async fn submit(ctx: AppContext, args: SubmitArgs) -> Result<()> {
    let dispatcher = Dispatcher::new(&ctx);
    let id = JobId::new();

    let mut staged = Vec::with_capacity(args.inputs.len());
    let enqueued = (|| -> tf_core::Result<JobId> {
        for input in &args.inputs {
            staged.push(dispatcher.stage_input(id, input)?);
        }
        dispatcher.submit_with_id(
            id,
            SubmitRequest {
                kind: args.kind.parse()?,
                inputs: staged.clone(),
                output: None,
                params: args.params.clone(),
                callback_url: args.callback.clone(),
            },
        )
    })();

    let id = match enqueued {
        Ok(id) => id,
        Err(e) => {
            if let Err(errors) = ctx.files.remove_inputs(&staged) {
                for err in errors {
                    tracing::warn!("Cleanup of staged input failed: {err}");
                }
            }
            return Err(e.into());
        }
    };
    println!("{id}");

    if !args.wait {
        return Ok(());
    }

    let timeout = args.timeout.map(Duration::from_secs);
    let result = tokio::select! {
        result = dispatcher.await_result(id, timeout) => result?,
        _ = tokio::signal::ctrl_c() => {
            dispatcher.abandon(id)?;
            bail!("interrupted while waiting for {id}");
        }
    };

    if args.callback.is_some() {
        // The callback receiver owns the output.
        println!("{}", result.display());
        return Ok(());
    }

    let dest = match args.output {
        Some(dest) => dest,
        None => PathBuf::from(
            result
                .file_name()
                .with_context(|| format!("result {} has no file name", result.display()))?,
        ),
    };
    let copied = copy_result(&result, &dest);
    dispatcher.release(id)?;
    copied?;
    println!("{}", dest.display());
    Ok(())
}

fn copy_result(result: &Path, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    std::fs::copy(result, dest)
        .with_context(|| format!("copying {} to {}", result.display(), dest.display()))?;
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG if set, otherwise pick defaults from the verbose flag.
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "transforge=debug,tf_server=debug,tf_av=debug,tf_db=debug,tower_http=debug".to_string()
        } else {
            "transforge=info,tf_server=info,tf_av=info,tf_db=info,tower_http=info".to_string()
        }
    });

    // Logs go to stderr so JSON output on stdout stays parseable.
    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    let mut config = Config::load_or_default(cli.config.as_deref());
    config.apply_env();

    match cli.command {
        Commands::Serve { host, port } => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(tf_server::serve(config))?;
        }
        Commands::Worker { count } => {
            let count = count.unwrap_or(config.workers.count);
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(tf_server::run_workers(config, count))?;
        }
        Commands::Submit {
            kind,
            inputs,
            output,
            params,
            callback,
            wait,
            timeout,
        } => {
            let ctx = tf_server::build_context(config)?;
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(submit(
                ctx,
                SubmitArgs {
                    kind,
                    inputs,
                    output,
                    params,
                    callback,
                    wait,
                    timeout,
                },
            ))?;
        }
        Commands::Status { id } => {
            let ctx = tf_server::build_context(config)?;
            let id: JobId = id.parse().with_context(|| format!("invalid task id '{id}'"))?;
            match ctx.store.get_task_info(id)? {
                Some(job) => print_json(&job)?,
                None => bail!("Task not found"),
            }
        }
        Commands::Stats => {
            let ctx = tf_server::build_context(config)?;
            print_json(&ctx.store.get_queue_stats()?)?;
        }
        Commands::Tasks {
            status,
            limit,
            offset,
        } => {
            let ctx = tf_server::build_context(config)?;
            let filter: StatusFilter = status.parse()?;
            print_json(&ctx.store.get_tasks(filter, limit, offset)?)?;
        }
        Commands::CheckTools => {
            let info = ToolRegistry::discover(&config.execution).check();
            if info.available {
                println!(
                    "{}: {} ({})",
                    info.name,
                    info.path
                        .as_deref()
                        .map(|p| p.display().to_string())
                        .unwrap_or_default(),
                    info.version.as_deref().unwrap_or("unknown version")
                );
            } else {
                println!("{}: not found", info.name);
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
