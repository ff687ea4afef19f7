/// Shop commands.

use colored::Colorize;
use termsh_core::shops::stock_label;
use termsh_core::{GameError, Result};

use crate::dispatch::CommandOutcome;
use crate::session::ShellSession;
use crate::style;

type Out = Result<CommandOutcome>;

fn text(s: String) -> Out {
    Ok(CommandOutcome::Output(s))
}

pub async fn shop(sess: &mut ShellSession, args: &[String]) -> Out {
    match args.first() {
        None => {
            let shops = sess.ctx.shops.list_shops().await?;
            if shops.is_empty() {
                return text(style::info_line("No shops anywhere. Odd economy."));
            }
            let rows: Vec<Vec<String>> = shops
                .into_iter()
                .map(|s| {
                    vec![
                        s.name,
                        s.shop_type.tag().to_string(),
                        s.server_ip,
                        s.description,
                    ]
                })
                .collect();
            text(style::table(&["shop", "type", "server", "about"], &rows))
        }
        Some(key) => {
            let shop = sess.ctx.shops.find_shop(key).await?;
            let items = sess.ctx.shops.browse(&shop).await?;
            let mut out = style::heading(&format!("{} — {}", shop.name, shop.description));
            let rows: Vec<Vec<String>> = items
                .iter()
                .enumerate()
                .map(|(i, item)| {
                    vec![
                        (i + 1).to_string(),
                        item.name.clone(),
                        item.item_type.tag().to_string(),
                        format!("{:.1}c / {:.0}d", item.price_crypto, item.price_data),
                        stock_label(item.stock),
                        item.description.clone(),
                    ]
                })
                .collect();
            out.push_str(&style::table(&["#", "item", "kind", "price", "stock", "about"], &rows));
            out.push_str(&style::info_line(&format!("buy {} <#> to purchase", shop.name)));
            text(out)
        }
    }
}

pub async fn buy(sess: &mut ShellSession, args: &[String]) -> Out {
    let [key, index] = args else {
        return Err(GameError::invalid("usage: buy <shop> <item-number>"));
    };
    let index: usize = index
        .parse()
        .map_err(|_| GameError::invalid("item number must be a number"))?;
    let shop = sess.ctx.shops.find_shop(key).await?;
    let item = sess.ctx.shops.purchase(&sess.user.id, &shop, index).await?;
    sess.refresh_user().await?;
    text(style::ok_line(&format!(
        "Bought {} — wallet now {} crypto / {} data",
        item.name.bright_magenta(),
        format!("{:.2}", sess.user.wallet.crypto).bright_yellow(),
        format!("{:.2}", sess.user.wallet.data).bright_cyan()
    )))
}
