// Copyright (C) 2025 Zihan Li and Ethan Uppal.

pub mod builder;
pub mod ir;
pub mod printer;
