use env_logger::{Builder, Env};

pub fn init() {
    Builder::from_env(Env::new().filter_or("PETPAD_LOG", "info"))
        .format_timestamp_millis()
        .init();
}
