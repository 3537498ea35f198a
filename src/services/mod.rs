//! External collaborators: the metadata tool bridge and the two tagging APIs

pub mod exiftool;
pub mod imagga_client;
pub mod shutterstock_client;

pub use exiftool::ExifTool;
pub use imagga_client::ImaggaClient;
pub use shutterstock_client::ShutterstockClient;
