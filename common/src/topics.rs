pub const TOPIC_COMMANDS: &str = "thermo/node/cmnd";
pub const TOPIC_DATA: &str = "thermo/node/data";
