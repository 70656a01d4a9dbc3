#[cfg(test)]
mod common;

#[cfg(test)]
mod parser_test;


#[cfg(test)]
mod binder_test;

#[cfg(test)]
mod eval_test;
