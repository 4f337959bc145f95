pub mod context;
pub mod deck;
pub mod expression;
pub mod lexer;
pub mod loader;
pub mod parser;
pub mod writer;
