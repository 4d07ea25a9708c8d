pub mod history;
pub mod reconnect;
pub mod state;
pub mod transport;

pub use history::HistoryClient;
pub use reconnect::{ClientHandle, EventHandler, ReconnectController};
pub use state::ControllerState;
pub use transport::{Connector, Transport, WsConnector};
