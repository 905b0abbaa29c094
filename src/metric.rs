pub mod accuracy;
pub mod gradnorm;
pub mod history;
pub mod loss_terms;
pub mod perplexity;
