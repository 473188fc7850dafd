// Wire protocol shared by the relay and the stream client.

pub mod stream;
