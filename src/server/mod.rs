mod server;

pub use server::RpcServer;
