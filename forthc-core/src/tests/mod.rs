mod parser;
mod tokens;
