pub(crate) mod byte;
