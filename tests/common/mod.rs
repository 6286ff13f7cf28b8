pub(crate) mod encryption;

pub(crate) mod logging;

pub(crate) mod mem_db;

pub(crate) mod mem_log;

pub(crate) mod network;

pub(crate) mod peer;

pub(crate) mod test_applier;
