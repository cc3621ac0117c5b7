pub mod dispatcher;
pub mod osascript;
pub mod primitive;
pub mod safety;
pub mod text_input;
pub mod verify;
