mod adc;
mod calibrate;
mod cli;
mod config;
mod error;
mod gestures;
mod intensity;
mod ipc;
mod logging;
mod pipeline;
mod runner;
mod sampler;
mod sink;
mod tracker;

fn main() -> anyhow::Result<()> {
    logging::init();
    cli::run()
}
