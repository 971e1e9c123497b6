pub mod api {
    pub mod v1 {
        tonic::include_proto!("log.v1");
    }
}

pub mod common;
pub mod server;
pub mod settings;
pub mod storage;
