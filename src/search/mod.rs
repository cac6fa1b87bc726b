pub mod assembler;
pub mod filters;
pub mod intent;
pub mod pagination;
pub mod price;
