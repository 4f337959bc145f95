pub mod packet;
pub mod storylet;
pub mod value;
