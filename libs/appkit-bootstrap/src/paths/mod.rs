pub mod app_root;
