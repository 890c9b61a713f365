
mod fetch_client;
