#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::too_many_arguments)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::too_many_lines)]
// X11 uses inconsistent integer types fairly interchangeably
#![allow(clippy::cast_lossless)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::module_name_repetitions)]

mod bar;
mod cli;
mod error;
mod eventloop;
mod ipc;
mod logger;

use x11rb::connection::Connection;
mod modules;
mod render;
mod sig;
mod tray;
mod x11;

use std::ffi::CString;

use log::LevelFilter;

use pgbar_core::config::{find_config_file, BarSettings, Config};
use pgbar_core::geometry::compute_geometry;

use crate::bar::Bar;
use crate::cli::Opts;
use crate::error::{Error, Result};
use crate::eventloop::EventLoop;
use crate::render::font::FontSet;
use crate::x11::call_wrapper::CallWrapper;
use crate::x11::visual::VisualInfo;

fn main() {
    std::process::exit(real_main());
}

fn real_main() -> i32 {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let opts = match cli::parse(&args) {
        Ok(opts) => opts,
        Err(message) => {
            eprintln!("{message}");
            eprintln!("{}", cli::USAGE);
            return 1;
        }
    };
    if opts.help {
        println!("{}", cli::USAGE);
        return 0;
    }
    logger::init(opts.log_level.unwrap_or(LevelFilter::Warn));

    match run(&opts) {
        Ok(()) | Err(Error::GracefulShutdown) => 0,
        Err(Error::Reload) => {
            // Re-exec the original argv in place so the pid (and with it the
            // IPC socket path) survives the reload
            log::info!("Restarting...");
            let argv: Vec<CString> = std::env::args()
                .filter_map(|a| CString::new(a).ok())
                .collect();
            let e = nix::unistd::execvp(&argv[0], &argv);
            log::error!("Failed to re-exec: {e:?}");
            1
        }
        Err(e) => {
            log::error!("Fatal error: {e}");
            1
        }
    }
}

fn run(opts: &Opts) -> Result<()> {
    let config_path = find_config_file(opts.config.as_deref())?;
    let config = Config::load(&config_path, &opts.bar)?;

    if let Some(key) = &opts.dump {
        match config.bar(key)? {
            Some(value) => println!("{value}"),
            None => println!(),
        }
        return Ok(());
    }
    if opts.print_exec {
        println!(
            "pgbar -c {} {}",
            config_path.display(),
            opts.bar
        );
        return Ok(());
    }

    let settings = BarSettings::load(&config, &opts.bar)?;

    let (connection, screen_num, monitor) =
        x11::screen::connect_and_find(settings.monitor.as_deref())?;
    if opts.print_wmname {
        println!("{}", settings.window_name(&monitor.name));
        return Ok(());
    }
    log::info!(
        "Bar {} on monitor {} ({}x{}+{}+{})",
        opts.bar,
        monitor.name,
        monitor.rect.width,
        monitor.rect.height,
        monitor.rect.x,
        monitor.rect.y
    );
    let geometry = compute_geometry(&settings, monitor.rect)?;
    let screen = connection.setup().roots[screen_num].clone();
    let call_wrapper = CallWrapper::new(&connection)?;
    let vis_info = VisualInfo::find_argb(&connection, &screen)?;
    let fonts = FontSet::load(&call_wrapper, &vis_info, &settings.fonts)?;

    let mut event_loop = EventLoop::new(&settings, Some(&config_path))?;
    sig::install(event_loop.wake_fd())?;

    let ipc = if settings.enable_ipc {
        Some(ipc::Ipc::new(opts.pipe.as_deref())?)
    } else {
        None
    };

    let mut bar = Bar::new(
        &connection,
        &call_wrapper,
        &fonts,
        &vis_info,
        &screen,
        screen_num,
        &config,
        settings,
        geometry,
        ipc,
        event_loop.link(),
        &monitor.name,
        opts.stdout,
    )?;
    bar.start_modules()?;
    if let Some(path) = bar.socket_path() {
        log::debug!("IPC socket at {}", path.display());
    }

    let result = event_loop.run(&mut bar);
    bar.teardown();
    result
}
