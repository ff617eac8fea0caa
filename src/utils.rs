use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub fn spawn_async<F>(fut: F) -> JoinHandle<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    tokio::spawn(fut)
}

/// Runs `fut` in the background and posts its output, mapped through `wrap`,
/// back to the owner of `tx`. A closed channel just drops the result.
pub fn run_async_to_owner<T, E, Fut, W>(tx: mpsc::UnboundedSender<E>, fut: Fut, wrap: W) -> JoinHandle<()>
where
    T: Send + 'static,
    E: Send + 'static,
    Fut: std::future::Future<Output = T> + Send + 'static,
    W: FnOnce(T) -> E + Send + 'static,
{
    spawn_async(async move {
        let res = fut.await;
        let _ = tx.send(wrap(res));
    })
}

pub fn normalize_url(input: &str) -> String {
    let trimmed = input.trim().trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    }
}

/// The gateway only accepts bare digits (country code included).
pub fn digits_only(address: &str) -> String {
    address.chars().filter(|c| c.is_ascii_digit()).collect()
}

pub fn whatsapp_jid(address: &str) -> String {
    format!("{}@s.whatsapp.net", digits_only(address))
}
